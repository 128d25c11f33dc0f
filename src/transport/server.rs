//! Server session - connection to a running `treestream serve`
//!
//! Sends the request record and hands back the read half. Chunk handling is
//! done by the client pipeline.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::{ChunkStream, Transport};
use crate::error::Result;
use crate::streaming::protocol::{write_record, RenderRequest};

/// Manages one connection to a render server
pub struct ServerSession {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl ServerSession {
    /// Connect and send the render request
    pub async fn connect(addr: SocketAddr, request: &RenderRequest) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, mut writer) = stream.into_split();

        write_record(&mut writer, &request.encode()?).await?;
        writer.flush().await?;
        debug!("Requested {} from {}", request.component, addr);

        Ok(Self { reader, writer })
    }

    /// Split into read/write halves
    pub fn split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}

/// Transport that opens one TCP connection per render request
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: SocketAddr,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, request: &RenderRequest) -> Result<ChunkStream> {
        let session = ServerSession::connect(self.addr, request).await?;
        // Request is one record; nothing else goes upstream.
        let (reader, mut writer) = session.split();
        writer.shutdown().await?;
        Ok(Box::new(reader))
    }
}
