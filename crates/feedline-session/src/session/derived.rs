//! Sessions derived from $HEAD.

use std::collections::HashSet;
use std::sync::Arc;

use feedline_types::{
    ModelMutation, ModelProvider, Operation, SessionMutation, Store, StreamSession,
    StreamStructure, StreamToken,
};
use tracing::{debug, error, trace, warn};

use super::UpdateSummary;

/// State common to bound and unbound sessions.
struct DerivedCore {
    stream_session: StreamSession,
    content_in_session: HashSet<String>,
    store: Arc<dyn Store>,
}

impl DerivedCore {
    fn new(stream_session: StreamSession, store: Arc<dyn Store>) -> Self {
        Self {
            stream_session,
            content_in_session: HashSet::new(),
            store,
        }
    }

    /// Replay a journal from scratch. Nothing is written to the store.
    fn populate(
        &mut self,
        structures: &[StreamStructure],
        mut observer: Option<&mut dyn ModelMutation>,
    ) {
        self.content_in_session.clear();
        for structure in structures {
            let content_id = &structure.content_id;
            match structure.operation {
                Operation::UpdateOrAppend => {
                    if self.content_in_session.insert(content_id.clone()) {
                        if let Some(observer) = observer.as_deref_mut() {
                            observer.add_child(structure);
                        }
                    } else if let Some(observer) = observer.as_deref_mut() {
                        observer.update_child(structure);
                    }
                }
                Operation::Remove => {
                    if self.content_in_session.remove(content_id)
                        && let Some(observer) = observer.as_deref_mut()
                    {
                        observer.remove_child(structure);
                    }
                }
                Operation::ClearAll => {
                    trace!(session = %self.stream_session.stream_token, "Skipping CLEAR_ALL in replay");
                }
                Operation::Unknown => {
                    warn!(content_id = %content_id, "Unknown operation in session journal");
                }
            }
        }
    }

    fn update(
        &mut self,
        structures: &[StreamStructure],
        mutation_source_token: Option<&StreamToken>,
        mut observer: Option<&mut dyn ModelMutation>,
    ) -> UpdateSummary {
        let token = &self.stream_session.stream_token;
        if let Some(source) = mutation_source_token
            && !self.content_in_session.contains(&source.content_id)
        {
            debug!(
                session = %token,
                source = %source.content_id,
                "Continuation token not in session, ignoring batch"
            );
            return UpdateSummary::stale();
        }

        let mut summary = UpdateSummary::applied();
        let mut mutation = SessionMutation::new(self.stream_session.clone());
        for structure in structures {
            let content_id = &structure.content_id;
            match structure.operation {
                Operation::UpdateOrAppend => {
                    if self.content_in_session.contains(content_id) {
                        if let Some(observer) = observer.as_deref_mut() {
                            observer.update_child(structure);
                        }
                        summary.updated += 1;
                    } else {
                        self.content_in_session.insert(content_id.clone());
                        mutation.add(structure.clone());
                        if let Some(observer) = observer.as_deref_mut() {
                            observer.add_child(structure);
                        }
                        summary.appended += 1;
                    }
                }
                Operation::Remove => {
                    if self.content_in_session.remove(content_id) {
                        mutation.add(structure.clone());
                        if let Some(observer) = observer.as_deref_mut() {
                            observer.remove_child(structure);
                        }
                        summary.removed += 1;
                    } else {
                        debug!(session = %token, content_id = %content_id, "REMOVE for content not in session");
                        summary.ignored += 1;
                    }
                }
                Operation::ClearAll => {
                    // Resets are driven by the manager.
                    summary.ignored += 1;
                }
                Operation::Unknown => {
                    warn!(session = %token, content_id = %content_id, "Unknown operation, skipping");
                    summary.ignored += 1;
                }
            }
        }

        if !mutation.is_empty()
            && let Err(e) = self.store.commit_session(mutation)
        {
            error!(session = %token, error = %e, "Failed to commit session journal");
        }

        debug!(
            session = %token,
            appended = summary.appended,
            updated = summary.updated,
            removed = summary.removed,
            content = self.content_in_session.len(),
            "Session updated"
        );
        summary
    }
}

/// A derived session restored from persisted metadata, with no observer.
pub struct UnboundSession {
    core: DerivedCore,
}

impl UnboundSession {
    pub(crate) fn new(stream_session: StreamSession, store: Arc<dyn Store>) -> Self {
        Self {
            core: DerivedCore::new(stream_session, store),
        }
    }

    pub fn stream_session(&self) -> &StreamSession {
        &self.core.stream_session
    }

    pub fn content_in_session(&self) -> &HashSet<String> {
        &self.core.content_in_session
    }

    pub fn update_access_time(&mut self, time: i64) {
        self.core.stream_session.last_accessed = time;
    }

    /// Load `content_in_session` from this session's own journal.
    pub fn populate(&mut self, structures: &[StreamStructure]) {
        self.core.populate(structures, None);
    }

    pub fn update_session(
        &mut self,
        structures: &[StreamStructure],
        mutation_source_token: Option<&StreamToken>,
    ) -> UpdateSummary {
        self.core.update(structures, mutation_source_token, None)
    }
}

/// A derived session with an attached observer.
///
/// Every change to `content_in_session` is mirrored into one observer
/// mutation per batch, committed after the journal write.
pub struct BoundSession {
    core: DerivedCore,
    model_provider: Arc<dyn ModelProvider>,
}

impl BoundSession {
    pub(crate) fn new(
        stream_session: StreamSession,
        store: Arc<dyn Store>,
        model_provider: Arc<dyn ModelProvider>,
    ) -> Self {
        Self {
            core: DerivedCore::new(stream_session, store),
            model_provider,
        }
    }

    pub fn stream_session(&self) -> &StreamSession {
        &self.core.stream_session
    }

    pub fn content_in_session(&self) -> &HashSet<String> {
        &self.core.content_in_session
    }

    pub fn update_access_time(&mut self, time: i64) {
        self.core.stream_session.last_accessed = time;
    }

    pub fn model_provider(&self) -> &Arc<dyn ModelProvider> {
        &self.model_provider
    }

    /// Replay `structures` from scratch into the session and the observer.
    ///
    /// `cached_bindings` tells the observer whether the content is already
    /// warm in the content cache.
    pub fn populate(&mut self, structures: &[StreamStructure], cached_bindings: bool) {
        let mut mutation = self.model_provider.edit();
        mutation.set_stream_session(&self.core.stream_session);
        self.core.populate(structures, Some(mutation.as_mut()));
        mutation.has_cached_bindings(cached_bindings);
        mutation.commit();
        debug!(
            session = %self.core.stream_session.stream_token,
            content = self.core.content_in_session.len(),
            cached_bindings,
            "Observer populated"
        );
    }

    pub fn update_session(
        &mut self,
        structures: &[StreamStructure],
        mutation_source_token: Option<&StreamToken>,
    ) -> UpdateSummary {
        let mut mutation = self.model_provider.edit();
        let summary = self
            .core
            .update(structures, mutation_source_token, Some(mutation.as_mut()));
        if !summary.applied {
            return summary;
        }
        if let Some(token) = mutation_source_token {
            mutation.set_mutation_source_token(token);
        }
        // Committed payloads are in the content cache for this mutation.
        mutation.has_cached_bindings(true);
        mutation.commit();
        summary
    }}
