//! Write-through cache of payloads committed by the latest mutation.

use std::collections::HashMap;

use feedline_types::StreamPayload;
use tracing::trace;

/// Payloads written by the mutation currently (or most recently) committed.
///
/// The cache is cleared when the next mutation starts, not when the current
/// one finishes, so sessions built right after a commit still find the
/// committed content without a store round-trip. It is never authoritative:
/// callers fall back to the store on a miss.
///
/// Not synchronized; the owner guards it with the same lock as the session
/// map.
#[derive(Debug, Default)]
pub struct ContentCache {
    contents: HashMap<String, StreamPayload>,
    mutation_count: u64,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new mutation window, discarding the previous one.
    pub fn start_mutation(&mut self) {
        self.mutation_count += 1;
        trace!(
            mutation = self.mutation_count,
            discarded = self.contents.len(),
            "Content cache mutation started"
        );
        self.contents.clear();
    }

    /// Close the mutation window. Contents stay until the next start.
    pub fn finish_mutation(&mut self) {
        trace!(
            mutation = self.mutation_count,
            cached = self.contents.len(),
            "Content cache mutation finished"
        );
    }

    /// Insert or overwrite, returning the previous payload.
    pub fn put(&mut self, content_id: impl Into<String>, payload: StreamPayload) -> Option<StreamPayload> {
        self.contents.insert(content_id.into(), payload)
    }

    pub fn get(&self, content_id: &str) -> Option<&StreamPayload> {
        self.contents.get(content_id)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// Number of mutation windows opened so far.
    pub fn mutation_count(&self) -> u64 {
        self.mutation_count
    }

    /// Drop all contents without opening a new window.
    pub fn reset(&mut self) {
        self.contents.clear();
    }
}
