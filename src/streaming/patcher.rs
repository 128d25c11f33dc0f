//! Incremental patcher.
//!
//! Installs the base chunk as the initial tree, then splices each later chunk
//! into the placeholder it targets. Chunks are applied strictly in arrival
//! order; each `apply` finishes mutating the tree before the next one starts.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{DecodeError, Result, StreamError};
use crate::streaming::channel::{PatchStats, PlaceholderIndex};
use crate::streaming::protocol::{Chunk, ChunkPayload, Target, BASE_TARGET};
use crate::tree::{Node, PlaceholderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatcherState {
    Empty,
    BasePending,
    Patching,
    Done,
}

/// Current client-side view of a streamed tree.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchedTree {
    pub root: Node,
    /// Placeholders whose subtree failed, with the reason streamed for them.
    pub failed: BTreeMap<PlaceholderId, String>,
}

impl PatchedTree {
    pub fn new(root: Node) -> Self {
        Self {
            root,
            failed: BTreeMap::new(),
        }
    }

    pub fn failure(&self, id: &PlaceholderId) -> Option<&str> {
        self.failed.get(id).map(String::as_str)
    }
}

#[derive(Debug)]
pub enum PatchOutcome {
    /// Base chunk became the tree.
    Installed,
    /// Placeholder replaced with its data.
    Patched(PlaceholderId),
    /// Placeholder resolved with a subtree-local error.
    Failed(PlaceholderId),
    /// Chunk dropped; the tree is unchanged.
    Dropped(StreamError),
}

impl PatchOutcome {
    /// Whether the tree changed and should be published again.
    pub fn is_refresh(&self) -> bool {
        !matches!(self, PatchOutcome::Dropped(_))
    }
}

pub struct Patcher {
    state: PatcherState,
    tree: Option<PatchedTree>,
    outstanding: PlaceholderIndex,
    stats: PatchStats,
}

impl Default for Patcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Patcher {
    pub fn new() -> Self {
        Self {
            state: PatcherState::Empty,
            tree: None,
            outstanding: PlaceholderIndex::new(),
            stats: PatchStats::default(),
        }
    }

    /// Stream opened; waiting for the base chunk.
    pub fn begin(&mut self) {
        if self.state == PatcherState::Empty {
            self.state = PatcherState::BasePending;
        }
    }

    pub fn state(&self) -> PatcherState {
        self.state
    }

    pub fn tree(&self) -> Option<&PatchedTree> {
        self.tree.as_ref()
    }

    pub fn outstanding(&self) -> &PlaceholderIndex {
        &self.outstanding
    }

    pub fn stats(&self) -> &PatchStats {
        &self.stats
    }

    /// Apply one chunk.
    ///
    /// Errors are session-fatal. Anomalies (unknown or duplicate targets) come
    /// back as `PatchOutcome::Dropped`.
    pub fn apply(&mut self, chunk: Chunk) -> Result<PatchOutcome> {
        self.stats.chunks_read += 1;
        match self.state {
            PatcherState::Empty | PatcherState::BasePending => self.install(chunk),
            PatcherState::Patching | PatcherState::Done => Ok(self.patch(chunk)),
        }
    }

    fn install(&mut self, chunk: Chunk) -> Result<PatchOutcome> {
        let root = match (chunk.target, chunk.payload) {
            (Target::Base, ChunkPayload::Data(root)) => root,
            (Target::Base, ChunkPayload::Error(_)) => {
                return Err(DecodeError::InvalidChunk("base chunk cannot carry an error".into()).into())
            }
            (Target::Placeholder(id), _) => {
                return Err(StreamError::MissingBase {
                    target: id.to_string(),
                })
            }
        };

        self.outstanding.extend(root.placeholders());
        debug!(
            "Installed base tree with {} placeholder(s)",
            self.outstanding.len()
        );
        self.tree = Some(PatchedTree::new(root));
        self.state = PatcherState::Patching;
        Ok(PatchOutcome::Installed)
    }

    fn patch(&mut self, chunk: Chunk) -> PatchOutcome {
        let id = match chunk.target {
            Target::Placeholder(id) => id,
            Target::Base => return self.drop_chunk(BASE_TARGET.to_string()),
        };
        if !self.outstanding.contains(&id) {
            return self.drop_chunk(id.to_string());
        }
        let Some(tree) = self.tree.as_mut() else {
            return self.drop_chunk(id.to_string());
        };

        match chunk.payload {
            ChunkPayload::Data(node) => {
                let nested = node.placeholders();
                if tree.root.replace_placeholder(&id, node).is_err() {
                    return self.drop_chunk(id.to_string());
                }
                self.outstanding.remove(&id);
                self.outstanding.extend(nested);
                self.stats.patched += 1;
                debug!("Patched {}", id);
                PatchOutcome::Patched(id)
            }
            ChunkPayload::Error(reason) => {
                warn!("Deferred subtree {} failed: {}", id, reason);
                self.outstanding.remove(&id);
                tree.failed.insert(id.clone(), reason);
                self.stats.failed += 1;
                PatchOutcome::Failed(id)
            }
        }
    }

    fn drop_chunk(&mut self, id: String) -> PatchOutcome {
        warn!("Dropping chunk for {}: no live placeholder", id);
        self.stats.dropped += 1;
        PatchOutcome::Dropped(StreamError::UnresolvedPlaceholder { id })
    }

    /// The transport closed.
    ///
    /// With every placeholder resolved the patcher is `Done`. Otherwise it stays
    /// in `Patching` and reports `StreamTerminatedEarly`; the unresolved
    /// subtrees keep their loading presentation.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            PatcherState::Empty | PatcherState::BasePending => Err(StreamError::EmptyStream),
            PatcherState::Done => Ok(()),
            PatcherState::Patching if self.outstanding.is_empty() => {
                self.state = PatcherState::Done;
                Ok(())
            }
            PatcherState::Patching => {
                let ids: Vec<String> = self
                    .outstanding
                    .remaining()
                    .iter()
                    .map(|id| id.to_string())
                    .collect();
                warn!("Stream terminated early; unresolved: {}", ids.join(", "));
                Err(StreamError::StreamTerminatedEarly { ids })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
