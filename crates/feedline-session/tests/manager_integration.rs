//! Feed session manager integration tests.
//!
//! Each test drives a manager wired to a `MemoryStore`, a scripted request
//! layer and a fixed scheduler, waiting for the task queue to go idle
//! between steps.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Result;
use feedline_session::{FeedSessionManager, MemoryStore, SessionKind, TaskType};
use feedline_types::{
    FakeClock, HEAD_TOKEN, ModelMutation, ModelProvider, MutationContext, RequestBehavior,
    RequestError, RequestReason, StreamToken,
};
use parking_lot::Mutex;

use common::{
    Harness, IDLE, RecordingObserver, T0, clear_all, config_from_toml, feature, journal,
    seed_shared_state, shared_state, token, wait_for,
};

fn ids(items: &[&str]) -> HashSet<String> {
    items.iter().map(|id| id.to_string()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Session creation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_new_session_on_empty_head() -> Result<()> {
    let h = Harness::start()?;

    let (session, observer) = h.new_session()?;

    assert_ne!(session, HEAD_TOKEN);
    assert!(h.manager.content_in_session(&session)?.is_empty());
    assert_eq!(h.manager.session_kind(&session), Some(SessionKind::Bound));
    assert_eq!(
        h.manager.persisted_session_tokens()?,
        vec![HEAD_TOKEN.to_string(), session.clone()]
    );
    assert_eq!(observer.cached_bindings(), Some(false));
    assert!(h.store.has_journal(&session));
    Ok(())
}

#[tokio::test]
async fn test_new_session_replays_head() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a"), feature("b")])?;

    let (session, observer) = h.new_session()?;

    assert_eq!(h.manager.content_in_session(&session)?, ids(&["a", "b"]));
    assert_eq!(observer.children(), vec!["a", "b"]);
    // The commit's payloads are still in the content cache.
    assert_eq!(observer.cached_bindings(), Some(true));
    Ok(())
}

#[tokio::test]
async fn test_scheduler_request_refreshes_after_creation() -> Result<()> {
    let h = Harness::start()?;
    h.scheduler.set_behavior(RequestBehavior::Request);
    h.requests.script_refresh(Ok(vec![feature("a")]));

    let (session, observer) = h.new_session()?;

    assert_eq!(
        h.requests.refresh_reasons(),
        vec![RequestReason::OpenWithoutContent]
    );
    assert_eq!(h.manager.content_in_session(&session)?, ids(&["a"]));
    assert_eq!(observer.children(), vec!["a"]);
    assert!(!h.manager.stats().queue.waiting_for_head_reset);
    Ok(())
}

#[tokio::test]
async fn test_empty_head_waits_for_refresh_at_startup() -> Result<()> {
    let h = Harness::build(
        MemoryStore::new(),
        Arc::new(FakeClock::new(T0)),
        RequestBehavior::RequestWithWait,
        Default::default(),
    )?;

    assert!(wait_for(IDLE, || h.requests.pending_refreshes() == 1));
    assert_eq!(
        h.requests.refresh_reasons(),
        vec![RequestReason::OpenWithoutContent]
    );
    assert!(!h.scheduler.states()[0].has_content);
    assert!(h.manager.stats().queue.waiting_for_head_reset);

    assert!(h.requests.complete_refresh(Ok(vec![feature("a")])));
    h.idle()?;

    assert_eq!(h.manager.content_in_session(HEAD_TOKEN)?, ids(&["a"]));
    assert!(!h.manager.stats().queue.waiting_for_head_reset);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Existing sessions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_existing_session_rebinds_observer() -> Result<()> {
    let h = Harness::start()?;
    let (session, first) = h.new_session()?;
    h.commit(MutationContext::new(), vec![feature("a")])?;

    let second = RecordingObserver::new();
    assert!(h.manager.get_existing_session(&session, second.clone()));
    h.idle()?;

    assert_eq!(first.invalidations(), 1);
    assert_eq!(second.token(), Some(session.clone()));
    assert_eq!(second.children(), vec!["a"]);
    assert_eq!(second.cached_bindings(), Some(false));
    assert_eq!(h.manager.session_kind(&session), Some(SessionKind::Bound));
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_is_not_found() -> Result<()> {
    let h = Harness::start()?;
    let observer = RecordingObserver::new();

    assert!(!h.manager.get_existing_session("expired-token", observer.clone()));
    assert!(!h.manager.get_existing_session(HEAD_TOKEN, observer.clone()));
    h.idle()?;

    assert_eq!(observer.commits(), 0);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Commits
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_commit_updates_every_session() -> Result<()> {
    let h = Harness::start()?;
    let (session, observer) = h.new_session()?;

    let operations = vec![feature("a"), feature("b")];
    let committer = h.manager.get_update_consumer(MutationContext::new());
    assert_eq!(committer.task_type(&operations), TaskType::UserFacing);
    committer.accept(Ok(operations));
    h.idle()?;

    assert_eq!(h.manager.content_in_session(HEAD_TOKEN)?, ids(&["a", "b"]));
    assert_eq!(h.manager.content_in_session(&session)?, ids(&["a", "b"]));
    assert_eq!(observer.children(), vec!["a", "b"]);
    assert_eq!(observer.cached_bindings(), Some(true));
    assert_eq!(h.manager.stats().shared_states, 0);
    assert_eq!(journal(&h.store, HEAD_TOKEN)?.len(), 2);
    assert_eq!(journal(&h.store, &session)?.len(), 2);
    assert_eq!(h.scheduler.new_content(), 1);
    Ok(())
}

#[tokio::test]
async fn test_clear_all_resets_only_originating_session() -> Result<()> {
    let h = Harness::start()?;
    let (first, first_observer) = h.new_session()?;
    let (second, second_observer) = h.new_session()?;
    h.commit(MutationContext::new(), vec![feature("a")])?;

    let operations = vec![clear_all(), feature("c")];
    let committer = h
        .manager
        .get_update_consumer(MutationContext::new().with_requesting_session(&first));
    assert_eq!(committer.task_type(&operations), TaskType::HeadReset);
    committer.accept(Ok(operations));
    h.idle()?;

    assert_eq!(first_observer.invalidations(), 1);
    assert!(!h.manager.session_tokens().contains(&first));
    assert!(!h.store.has_journal(&first));

    assert_eq!(second_observer.invalidations(), 0);
    assert_eq!(h.manager.content_in_session(&second)?, ids(&["a"]));

    assert_eq!(h.manager.content_in_session(HEAD_TOKEN)?, ids(&["c"]));
    assert_eq!(journal(&h.store, HEAD_TOKEN)?.len(), 1);
    assert_eq!(
        h.manager.persisted_session_tokens()?,
        vec![HEAD_TOKEN.to_string(), second]
    );
    assert_eq!(h.manager.stats().head_resets, 1);
    Ok(())
}

#[tokio::test]
async fn test_shared_state_cache() -> Result<()> {
    let store = MemoryStore::new();
    seed_shared_state(&store, "ss1")?;
    let h = Harness::build(
        store,
        Arc::new(FakeClock::new(T0)),
        RequestBehavior::NoRequest,
        Default::default(),
    )?;
    h.idle()?;

    assert!(h.manager.get_shared_state("ss1").is_some());
    assert!(h.manager.get_shared_state("ss2").is_none());

    h.commit(
        MutationContext::new(),
        vec![shared_state("ss2"), feature("a")],
    )?;

    assert!(h.manager.get_shared_state("ss2").is_some());
    assert_eq!(h.manager.stats().shared_states, 2);
    // Shared state is content, not structure.
    assert_eq!(h.manager.content_in_session(HEAD_TOKEN)?, ids(&["a"]));
    assert!(h.store.content("ss2").is_some());
    Ok(())
}

#[tokio::test]
async fn test_stream_features_cache_then_store() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a"), feature("b")])?;

    let (tx, rx) = std::sync::mpsc::channel();
    h.manager.get_stream_features(
        vec!["a".to_string(), "b".to_string(), "missing".to_string()],
        move |payloads| {
            let _ = tx.send(payloads);
        },
    );
    let payloads = rx.recv_timeout(IDLE)?;
    let mut found: Vec<String> = payloads.iter().map(|p| p.content_id.clone()).collect();
    found.sort();
    assert_eq!(found, vec!["a", "b"]);

    // The next commit empties the cache; "a" now comes from the store.
    h.commit(MutationContext::new(), vec![feature("c")])?;
    let (tx, rx) = std::sync::mpsc::channel();
    h.manager
        .get_stream_features(vec!["a".to_string()], move |payloads| {
            let _ = tx.send(payloads);
        });
    let payloads = rx.recv_timeout(IDLE)?;
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].payload.kind(), "feature");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Continuations
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_continuation_replaces_token() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a"), token("t1")])?;
    let (session, observer) = h.new_session()?;

    h.requests
        .script_load_more(Ok(vec![feature("b"), token("t2")]));
    h.manager
        .handle_token(&session, StreamToken::new("t1", "t1-next"), None);
    h.idle()?;

    assert_eq!(h.requests.loaded_tokens()[0].content_id, "t1");
    assert_eq!(
        h.manager.content_in_session(HEAD_TOKEN)?,
        ids(&["a", "b", "t2"])
    );
    assert_eq!(
        h.manager.content_in_session(&session)?,
        ids(&["a", "b", "t2"])
    );
    assert_eq!(observer.children(), vec!["a", "b", "t2"]);
    assert_eq!(observer.source_tokens(), vec!["t1"]);
    Ok(())
}

#[tokio::test]
async fn test_stale_continuation_is_dropped() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a"), token("t1")])?;
    let (session, _observer) = h.new_session()?;

    h.requests.script_load_more(Ok(vec![feature("b")]));
    h.manager
        .handle_token(&session, StreamToken::new("t1", "t1-next"), None);
    h.idle()?;

    // t1 is gone now; loading it again must not touch any session.
    h.requests.script_load_more(Ok(vec![feature("c")]));
    h.manager
        .handle_token(&session, StreamToken::new("t1", "t1-next"), None);
    h.idle()?;

    assert_eq!(h.manager.content_in_session(HEAD_TOKEN)?, ids(&["a", "b"]));
    assert_eq!(h.manager.content_in_session(&session)?, ids(&["a", "b"]));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_continuation_commit_times_out_behind_head_reset() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a"), token("t1")])?;
    let (session, _observer) = h.new_session()?;

    h.manager.trigger_refresh(None);
    assert!(wait_for(IDLE, || h.requests.pending_refreshes() == 1));

    h.requests.script_load_more(Ok(vec![feature("b")]));
    h.manager.handle_token(
        &session,
        StreamToken::new("t1", "t1-next"),
        Some(Duration::from_millis(50)),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.manager.stats().queue.timed_out, 1);

    assert!(
        h.requests
            .complete_refresh(Err(RequestError::Failed("offline".into())))
    );
    h.idle()?;

    let head = h.manager.content_in_session(HEAD_TOKEN)?;
    assert!(head.contains("t1"));
    assert!(!head.contains("b"));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Refresh and reset
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_response_resets_head() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a")])?;
    let (session, observer) = h.new_session()?;

    h.requests
        .script_refresh(Ok(vec![clear_all(), feature("b")]));
    h.manager.trigger_refresh(Some(&session));
    h.idle()?;

    assert_eq!(h.requests.refresh_reasons(), vec![RequestReason::ManualRefresh]);
    // Once when the request is issued, once when the reset drops the session.
    assert_eq!(observer.invalidations(), 2);
    assert_eq!(h.manager.session_tokens(), vec![HEAD_TOKEN.to_string()]);
    assert_eq!(h.manager.content_in_session(HEAD_TOKEN)?, ids(&["b"]));
    assert!(!h.manager.stats().queue.waiting_for_head_reset);
    Ok(())
}

#[tokio::test]
async fn test_request_failure_releases_parked_work() -> Result<()> {
    let h = Harness::start()?;
    h.manager.trigger_refresh(None);
    assert!(wait_for(IDLE, || h.requests.pending_refreshes() == 1));

    let observer = RecordingObserver::new();
    h.manager.get_new_session(observer.clone());
    assert_eq!(h.manager.stats().queue.user_queued, 1);

    assert!(
        h.requests
            .complete_refresh(Err(RequestError::Failed("offline".into())))
    );
    h.idle()?;

    assert!(observer.token().is_some());
    assert_eq!(h.scheduler.errors(), 1);
    assert!(!h.manager.stats().queue.waiting_for_head_reset);
    Ok(())
}

#[tokio::test]
async fn test_failed_continuation_keeps_head_gate_closed() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a"), token("t1")])?;
    let (session, _observer) = h.new_session()?;

    h.manager.trigger_refresh(None);
    assert!(wait_for(IDLE, || h.requests.pending_refreshes() == 1));
    let parked = RecordingObserver::new();
    h.manager.get_new_session(parked.clone());

    // Nothing is scripted for the load, so it fails.
    h.manager
        .handle_token(&session, StreamToken::new("t1", "t1-next"), None);

    let stats = h.manager.stats();
    assert!(stats.queue.waiting_for_head_reset);
    assert_eq!(stats.queue.user_queued, 1);
    assert!(parked.token().is_none());
    assert_eq!(h.scheduler.errors(), 0);

    assert!(
        h.requests
            .complete_refresh(Err(RequestError::Failed("offline".into())))
    );
    h.idle()?;

    assert!(parked.token().is_some());
    assert_eq!(h.scheduler.errors(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_starvation_releases_parked_work() -> Result<()> {
    let config = config_from_toml(
        r#"
[task_queue]
starvation_timeout_ms = 100
starvation_check_ms = 20
"#,
    )?;
    let h = Harness::build(
        MemoryStore::new(),
        Arc::new(FakeClock::new(T0)),
        RequestBehavior::NoRequest,
        config,
    )?;
    h.idle()?;

    h.manager.trigger_refresh(None);
    assert!(wait_for(IDLE, || h.requests.pending_refreshes() == 1));
    let observer = RecordingObserver::new();
    h.manager.get_new_session(observer.clone());
    h.idle()?;

    assert!(observer.token().is_some());
    assert_eq!(h.manager.stats().queue.starvation_releases, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalidate_head_drops_bound_sessions() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![feature("a")])?;
    let (session, observer) = h.new_session()?;

    h.manager.invalidate_head();
    h.idle()?;

    assert_eq!(observer.invalidations(), 1);
    assert_eq!(h.manager.session_tokens(), vec![HEAD_TOKEN.to_string()]);
    assert!(h.manager.content_in_session(HEAD_TOKEN)?.is_empty());
    assert!(journal(&h.store, HEAD_TOKEN)?.is_empty());
    assert!(!h.store.has_journal(&session));
    assert_eq!(
        h.manager.persisted_session_tokens()?,
        vec![HEAD_TOKEN.to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_reset_clears_caches() -> Result<()> {
    let store = MemoryStore::new();
    seed_shared_state(&store, "ss1")?;
    let h = Harness::build(
        store,
        Arc::new(FakeClock::new(T0)),
        RequestBehavior::NoRequest,
        Default::default(),
    )?;
    h.idle()?;
    let (_session, observer) = h.new_session()?;
    h.commit(MutationContext::new(), vec![feature("a")])?;

    h.manager.reset();
    h.idle()?;

    let stats = h.manager.stats();
    assert!(h.manager.get_shared_state("ss1").is_none());
    assert_eq!(stats.shared_states, 0);
    assert_eq!(stats.cached_payloads, 0);
    assert_eq!(stats.sessions, 1);
    assert_eq!(observer.invalidations(), 1);
    assert!(h.manager.content_in_session(HEAD_TOKEN)?.is_empty());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence and expiry
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_persisted_sessions_restore_unbound() -> Result<()> {
    let store = MemoryStore::new();
    let clock = Arc::new(FakeClock::new(T0));

    let session = {
        let h = Harness::build(
            store.clone(),
            clock.clone(),
            RequestBehavior::NoRequest,
            Default::default(),
        )?;
        h.idle()?;
        let (session, _observer) = h.new_session()?;
        h.commit(MutationContext::new(), vec![feature("a")])?;
        session
    };

    clock.advance(60_000);
    let h = Harness::build(
        store.clone(),
        clock.clone(),
        RequestBehavior::NoRequest,
        Default::default(),
    )?;
    h.idle()?;

    assert_eq!(h.manager.session_kind(&session), Some(SessionKind::Unbound));
    assert_eq!(h.manager.content_in_session(&session)?, ids(&["a"]));
    assert_eq!(h.manager.content_in_session(HEAD_TOKEN)?, ids(&["a"]));
    assert_eq!(h.manager.stats().unbound_sessions, 1);
    assert!(store.content_ids().contains("a"));
    Ok(())
}

#[tokio::test]
async fn test_expired_persisted_sessions_are_cleaned_up() -> Result<()> {
    let store = MemoryStore::new();
    let clock = Arc::new(FakeClock::new(T0));

    let session = {
        let h = Harness::build(
            store.clone(),
            clock.clone(),
            RequestBehavior::NoRequest,
            Default::default(),
        )?;
        h.idle()?;
        h.new_session()?.0
    };
    assert!(store.has_journal(&session));

    clock.set(T0 + 3_600_000 + 1);
    let h = Harness::build(
        store.clone(),
        clock.clone(),
        RequestBehavior::NoRequest,
        Default::default(),
    )?;
    h.idle()?;

    assert!(h.manager.session_kind(&session).is_none());
    assert!(!store.has_journal(&session));
    Ok(())
}

#[tokio::test]
async fn test_collect_garbage_drops_expired_sessions() -> Result<()> {
    let h = Harness::start()?;
    let (session, observer) = h.new_session()?;

    h.clock.advance(3_600_001);
    h.manager.collect_garbage();
    h.idle()?;

    assert_eq!(h.manager.session_tokens(), vec![HEAD_TOKEN.to_string()]);
    assert_eq!(observer.invalidations(), 1);
    assert!(!h.store.has_journal(&session));
    assert_eq!(
        h.manager.persisted_session_tokens()?,
        vec![HEAD_TOKEN.to_string()]
    );
    Ok(())
}

/// An observer that reads manager state back from `invalidate`.
#[derive(Default)]
struct ReentrantObserver {
    recorder: RecordingObserver,
    manager: OnceLock<FeedSessionManager>,
    kinds_seen: Mutex<Vec<Option<SessionKind>>>,
}

impl ModelProvider for ReentrantObserver {
    fn edit(&self) -> Box<dyn ModelMutation> {
        self.recorder.edit()
    }

    fn invalidate(&self) {
        self.recorder.invalidate();
        if let (Some(manager), Some(token)) = (self.manager.get(), self.recorder.token()) {
            self.kinds_seen.lock().push(manager.session_kind(&token));
        }
    }

    fn session_token(&self) -> Option<String> {
        self.recorder.session_token()
    }
}

#[tokio::test]
async fn test_expired_observer_can_query_manager_on_invalidate() -> Result<()> {
    let h = Harness::start()?;
    let observer = Arc::new(ReentrantObserver::default());
    h.manager.get_new_session(observer.clone());
    h.idle()?;
    assert!(observer.manager.set(h.manager.clone()).is_ok());

    h.clock.advance(3_600_001);
    h.manager.collect_garbage();
    h.idle()?;

    assert_eq!(*observer.kinds_seen.lock(), vec![Some(SessionKind::Bound)]);
    assert_eq!(h.manager.session_tokens(), vec![HEAD_TOKEN.to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_handle_token_refreshes_access_time() -> Result<()> {
    let h = Harness::start()?;
    h.commit(MutationContext::new(), vec![token("t1")])?;
    let (session, _observer) = h.new_session()?;

    h.clock.advance(3_000_000);
    h.requests.script_load_more(Ok(vec![feature("b")]));
    h.manager
        .handle_token(&session, StreamToken::new("t1", "t1-next"), None);
    h.idle()?;

    // Without the access, the session would be past its lifetime here.
    h.clock.advance(1_000_000);
    h.manager.collect_garbage();
    h.idle()?;

    assert!(h.manager.session_tokens().contains(&session));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Threading
// ─────────────────────────────────────────────────────────────────────────────

fn panics_off_main_thread(
    manager: &FeedSessionManager,
    call: impl FnOnce(FeedSessionManager) + Send + 'static,
) -> bool {
    let manager = manager.clone();
    std::thread::spawn(move || call(manager)).join().is_err()
}

#[tokio::test]
async fn test_main_thread_entry_points_reject_other_threads() -> Result<()> {
    let h = Harness::start()?;
    let (session, _observer) = h.new_session()?;

    assert!(panics_off_main_thread(&h.manager, |m| {
        m.get_new_session(RecordingObserver::new())
    }));
    let token = session.clone();
    assert!(panics_off_main_thread(&h.manager, move |m| {
        m.get_existing_session(&token, RecordingObserver::new());
    }));
    assert!(panics_off_main_thread(&h.manager, |m| m.invalidate_head()));
    assert!(panics_off_main_thread(&h.manager, |m| m.trigger_refresh(None)));
    let token = session.clone();
    assert!(panics_off_main_thread(&h.manager, move |m| {
        m.handle_token(&token, StreamToken::new("t1", "t1-next"), None)
    }));
    assert!(panics_off_main_thread(&h.manager, |m| {
        let _ = m.get_shared_state("ss1");
    }));

    h.idle()?;
    let stats = h.manager.stats();
    assert!(!stats.queue.waiting_for_head_reset);
    assert_eq!(stats.sessions, 2);
    assert!(h.requests.refresh_reasons().is_empty());
    assert!(h.requests.loaded_tokens().is_empty());
    Ok(())
}
