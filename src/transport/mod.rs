//! Client transports: how a render request reaches a server and how the chunk
//! stream comes back.

pub mod server;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;
use crate::streaming::protocol::RenderRequest;

/// Ordered, reliable byte stream carrying one session's chunks.
pub type ChunkStream = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `request` and return the stream its chunks arrive on.
    async fn open(&self, request: &RenderRequest) -> Result<ChunkStream>;
}

pub use server::{ServerSession, TcpTransport};
