//! Channel types for the render pipeline.
//!
//! Deferred computations -> writer loop, through an unbounded channel so a
//! completing task never waits on the sink.

use crate::streaming::protocol::Chunk;
use crate::tree::PlaceholderId;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

// =============================================================================
// Chunk channel: completions -> writer
// =============================================================================

/// Sender for resolved or failed chunks
pub type ChunkSender = mpsc::UnboundedSender<Chunk>;

/// Receiver owned by the single writer loop
pub type ChunkReceiver = mpsc::UnboundedReceiver<Chunk>;

pub fn chunk_channel() -> (ChunkSender, ChunkReceiver) {
    mpsc::unbounded_channel()
}

// =============================================================================
// Placeholder index
// =============================================================================

/// Set of placeholder ids still waiting for their chunk.
///
/// Used as the pending set of a render session and as the outstanding set of a
/// patcher.
#[derive(Debug, Default, Clone)]
pub struct PlaceholderIndex {
    ids: BTreeSet<PlaceholderId>,
}

impl PlaceholderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: PlaceholderId) -> bool {
        self.ids.insert(id)
    }

    pub fn remove(&mut self, id: &PlaceholderId) -> bool {
        self.ids.remove(id)
    }

    pub fn contains(&self, id: &PlaceholderId) -> bool {
        self.ids.contains(id)
    }

    pub fn extend(&mut self, ids: impl IntoIterator<Item = PlaceholderId>) {
        self.ids.extend(ids);
    }

    /// Remaining ids, allocation order for ids minted by a session.
    pub fn remaining(&self) -> Vec<PlaceholderId> {
        let mut ids: Vec<_> = self.ids.iter().cloned().collect();
        ids.sort_by_key(|id| (id.sequence().unwrap_or(u64::MAX), id.clone()));
        ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Statistics for one render session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenderStats {
    /// Chunks written to the sink, base included
    pub chunks_written: u64,

    /// Placeholders allocated for deferred subtrees
    pub placeholders: u64,

    /// Deferred subtrees that ended in an error chunk
    pub failed_subtrees: u64,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Statistics for one client session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchStats {
    /// Chunks read off the stream
    pub chunks_read: u64,

    /// Placeholders replaced with data
    pub patched: u64,

    /// Placeholders resolved with an error
    pub failed: u64,

    /// Chunks dropped because their target was not live
    pub dropped: u64,
}

// =============================================================================
// Tests
// =============================================================================
