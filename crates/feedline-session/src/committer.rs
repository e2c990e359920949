//! Commits inbound data operations.

use std::sync::Arc;
use std::time::Duration;

use feedline_types::{
    ContentMutation, MutationContext, Operation, SemanticPropertiesMutation, StreamDataOperation,
    StreamPayload, StreamStructure, UpdateConsumer, UpdateResult,
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SessionError};
use crate::manager::ManagerInner;
use crate::task_queue::TaskType;

/// Receives one result from the request layer and commits it.
///
/// A commit writes content to the store and the content cache, refreshes
/// the shared-state cache, then applies the structural operations to every
/// live session (only $HEAD when the batch cleared it).
pub struct CommitterTask {
    inner: Arc<ManagerInner>,
    context: MutationContext,
    timeout: Option<Duration>,
}

impl CommitterTask {
    pub(crate) fn new(
        inner: Arc<ManagerInner>,
        context: MutationContext,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner,
            context,
            timeout,
        }
    }

    pub fn context(&self) -> &MutationContext {
        &self.context
    }

    /// Queue priority for a batch.
    ///
    /// A batch that clears $HEAD is a head reset. So is a refresh response
    /// arriving while the queue waits for one.
    pub fn task_type(&self, operations: &[StreamDataOperation]) -> TaskType {
        if contains_clear_all(operations) {
            return TaskType::HeadReset;
        }
        if self.context.reason.is_some() && self.inner.task_queue.is_waiting_for_head_reset() {
            return TaskType::HeadReset;
        }
        TaskType::UserFacing
    }

    pub fn accept(self, result: UpdateResult) {
        let operations = match result {
            Ok(operations) => operations,
            Err(e) => {
                let e = SessionError::from(e);
                error!(
                    error = %e,
                    reason = ?self.context.reason,
                    "Update request failed, dropping batch"
                );
                if self.context.reason.is_some() {
                    self.inner.state.lock().outstanding_request = false;
                    self.inner.scheduler.on_request_error();
                    // The head reset this refresh would have produced is not coming.
                    self.inner.task_queue.release_head_reset();
                }
                return;
            }
        };

        let task_type = self.task_type(&operations);
        debug!(
            operations = operations.len(),
            task_type = %task_type,
            "Scheduling commit"
        );

        let Self {
            inner,
            context,
            timeout,
        } = self;
        let queue = inner.task_queue.clone();
        let body = move || commit(&inner, &context, operations);
        match timeout {
            Some(timeout) => queue.execute_with_timeout("commit", task_type, body, timeout, move || {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Commit did not start in time, dropping batch"
                )
            }),
            None => queue.execute("commit", task_type, body),
        }
    }

    /// Box this task as a consumer for the request layer.
    pub fn into_consumer(self) -> UpdateConsumer {
        Box::new(move |result| self.accept(result))
    }
}

impl std::fmt::Debug for CommitterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitterTask")
            .field("context", &self.context)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn contains_clear_all(operations: &[StreamDataOperation]) -> bool {
    operations
        .iter()
        .any(|op| op.structure.operation == Operation::ClearAll)
}

/// Extract the id and payload of an `UPDATE_OR_APPEND`.
fn content_of(operation: StreamDataOperation) -> Result<(StreamStructure, StreamPayload)> {
    let StreamDataOperation { structure, payload } = operation;
    if structure.content_id.is_empty() {
        return Err(SessionError::InvalidOperation(
            "UPDATE_OR_APPEND without a content id".to_string(),
        ));
    }
    match payload {
        Some(payload) => Ok((structure, payload)),
        None => Err(SessionError::InvalidOperation(format!(
            "UPDATE_OR_APPEND for {} without a payload",
            structure.content_id
        ))),
    }
}

fn commit(inner: &Arc<ManagerInner>, context: &MutationContext, operations: Vec<StreamDataOperation>) {
    inner.state.lock().content_cache.start_mutation();

    let mut content = ContentMutation::new();
    let mut semantic = SemanticPropertiesMutation::new();
    let mut structures = Vec::with_capacity(operations.len());
    let mut head_cleared = false;

    for operation in operations {
        match operation.structure.operation {
            Operation::ClearAll => {
                structures.push(operation.structure);
                inner.reset_head(context.requesting_session.as_deref());
                head_cleared = true;
            }
            Operation::Remove => structures.push(operation.structure),
            Operation::UpdateOrAppend => {
                let (structure, payload) = match content_of(operation) {
                    Ok(content) => content,
                    Err(e) => {
                        error!(error = %e, "Skipping data operation");
                        continue;
                    }
                };
                let content_id = structure.content_id.clone();
                match payload {
                    StreamPayload::Feature(_) | StreamPayload::Token(_) => {
                        inner
                            .state
                            .lock()
                            .content_cache
                            .put(content_id.clone(), payload.clone());
                        content.add(content_id, payload);
                        structures.push(structure);
                    }
                    StreamPayload::SharedState(shared_state) => {
                        inner
                            .state
                            .lock()
                            .shared_state_cache
                            .insert(content_id.clone(), shared_state.clone());
                        content.add(content_id, StreamPayload::SharedState(shared_state));
                    }
                    StreamPayload::SemanticData { data } => {
                        semantic.add(content_id, data);
                    }
                    StreamPayload::Sessions(_) => {
                        error!(content_id = %content_id, "Session index is not committable content");
                    }
                }
            }
            Operation::Unknown => {
                warn!(content_id = %operation.structure.content_id, "Unknown operation, skipping");
            }
        }
    }

    let content_count = content.len();
    if !content.is_empty()
        && let Err(e) = inner.store.commit_content(content)
    {
        error!(error = %e, "Failed to commit content");
    }
    if !semantic.is_empty()
        && let Err(e) = inner.store.commit_semantic_properties(semantic)
    {
        error!(error = %e, "Failed to commit semantic properties");
    }

    // The continuation token is replaced by whatever it loaded.
    if let Some(token) = &context.continuation_token {
        structures.insert(
            0,
            StreamStructure::new(
                token.content_id.clone(),
                token.parent_id.clone(),
                Operation::Remove,
            ),
        );
    }

    let sessions = inner.sessions_to_update(head_cleared);
    let mut applied = 0usize;
    for handle in &sessions {
        let summary = handle
            .lock()
            .update_session(&structures, context.continuation_token.as_ref());
        if summary.applied {
            applied += 1;
        }
    }

    let now = inner.now();
    {
        let mut state = inner.state.lock();
        state.last_refresh_time = now;
        state.outstanding_request = false;
        state.commits += 1;
        state.content_cache.finish_mutation();
    }
    inner.scheduler.on_receive_new_content(now);

    info!(
        structures = structures.len(),
        content = content_count,
        sessions = sessions.len(),
        applied,
        head_cleared,
        "Commit finished"
    );
}
