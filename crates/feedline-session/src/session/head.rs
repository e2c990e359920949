//! The $HEAD session.

use std::collections::HashSet;
use std::sync::Arc;

use feedline_types::{Operation, SessionMutation, Store, StreamSession, StreamStructure, StreamToken};
use tracing::{debug, error, warn};

use super::UpdateSummary;

/// The canonical structure log every other session derives from.
///
/// $HEAD's journal is append-only: a repeat `UPDATE_OR_APPEND` is skipped
/// rather than re-appended.
pub struct HeadSession {
    stream_session: StreamSession,
    content_in_session: HashSet<String>,
    store: Arc<dyn Store>,
}

impl HeadSession {
    pub(crate) fn new(stream_session: StreamSession, store: Arc<dyn Store>) -> Self {
        Self {
            stream_session,
            content_in_session: HashSet::new(),
            store,
        }
    }

    pub fn stream_session(&self) -> &StreamSession {
        &self.stream_session
    }

    pub fn content_in_session(&self) -> &HashSet<String> {
        &self.content_in_session
    }

    pub fn has_content(&self) -> bool {
        !self.content_in_session.is_empty()
    }

    pub fn update_access_time(&mut self, time: i64) {
        self.stream_session.last_accessed = time;
    }

    /// Rebuild `content_in_session` from a persisted journal without writing
    /// anything back.
    pub fn initialize(&mut self, structures: &[StreamStructure]) {
        self.content_in_session.clear();
        for structure in structures {
            match structure.operation {
                Operation::UpdateOrAppend => {
                    self.content_in_session.insert(structure.content_id.clone());
                }
                Operation::Remove => {
                    self.content_in_session.remove(&structure.content_id);
                }
                Operation::ClearAll => self.content_in_session.clear(),
                Operation::Unknown => {
                    warn!(content_id = %structure.content_id, "Unknown operation in $HEAD journal");
                }
            }
        }
        debug!(content = self.content_in_session.len(), "$HEAD initialized");
    }

    /// Forget all content. The store journal is cleared separately.
    pub fn reset(&mut self) {
        self.content_in_session.clear();
    }

    pub fn update_session(
        &mut self,
        structures: &[StreamStructure],
        mutation_source_token: Option<&StreamToken>,
    ) -> UpdateSummary {
        if let Some(token) = mutation_source_token
            && !self.content_in_session.contains(&token.content_id)
        {
            debug!(
                token = %token.content_id,
                "Continuation token not in $HEAD, ignoring batch"
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
                        warn!(content_id = %content_id, "Content already in $HEAD, not appending again");
                        summary.updated += 1;
                    } else {
                        self.content_in_session.insert(content_id.clone());
                        mutation.add(structure.clone());
                        summary.appended += 1;
                    }
                }
                Operation::Remove => {
                    if self.content_in_session.remove(content_id) {
                        mutation.add(structure.clone());
                        summary.removed += 1;
                    } else {
                        debug!(content_id = %content_id, "REMOVE for content not in $HEAD");
                        summary.ignored += 1;
                    }
                }
                Operation::ClearAll => {
                    self.content_in_session.clear();
                    summary.cleared += 1;
                }
                Operation::Unknown => {
                    warn!(content_id = %content_id, "Unknown operation, skipping");
                    summary.ignored += 1;
                }
            }
        }

        // In-memory state is already ahead of the journal if this fails.
        if !mutation.is_empty()
            && let Err(e) = self.store.commit_session(mutation)
        {
            error!(error = %e, "Failed to commit $HEAD journal");
        }

        debug!(
            appended = summary.appended,
            updated = summary.updated,
            removed = summary.removed,
            cleared = summary.cleared,
            content = self.content_in_session.len(),
            "$HEAD updated"
        );
        summary
    }
}
