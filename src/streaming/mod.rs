//! Streaming tree protocol.
//!
//! The producer renders as much of a tree as it can right away and streams
//! the rest later, one chunk per deferred subtree.
//!
//! # Architecture
//!
//! ```text
//! Server:
//! +--------------+     +--------------+     +--------------+
//! |   Producer   | --> |   Renderer   | --> |    Writer    | --> sink
//! | (components) |     | (walk, ids)  |     | (one loop)   |
//! +--------------+     +--------------+     +--------------+
//!
//! Client:
//!        +--------------+     +--------------+     +--------------+
//! -->    |    Reader    | --> |   Patcher    | --> |     View     |
//!        | (decode)     |     | (splice ids) |     | (lazy refs)  |
//!        +--------------+     +--------------+     +--------------+
//! ```
//!
//! # Chunks
//!
//! 1. Base - `{"target":"base","data":<tree>}`, always first, exactly once
//! 2. Resolution - `{"target":"C:<n>","data":<subtree>}` or
//!    `{"target":"C:<n>","error":<reason>}`, any order among siblings
//!
//! The writer closes the stream right after the last pending id is written.

pub mod channel;
pub mod patcher;
pub mod pipeline;
pub mod producer;
pub mod protocol;
pub mod renderer;

pub use channel::{PatchStats, PlaceholderIndex, RenderStats};
pub use patcher::{PatchOutcome, PatchedTree, Patcher, PatcherState};
pub use pipeline::{run_session, settled, SessionCache, ViewState};
pub use producer::{ComponentRegistry, NodeProducer, Production};
pub use protocol::{Chunk, ChunkPayload, RenderRequest, Target};
pub use renderer::{render_to_stream, RenderSession};
