//! Render server - runs when invoked as `treestream serve`
//!
//! One TCP connection carries one render request: a single request record in,
//! the chunk stream out.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::streaming::{
    channel::RenderStats,
    producer::NodeProducer,
    protocol::{read_record, RenderRequest},
    render_to_stream,
};

pub struct RenderServer {
    listener: TcpListener,
    producer: Arc<dyn NodeProducer>,
}

impl RenderServer {
    pub async fn bind(addr: SocketAddr, producer: Arc<dyn NodeProducer>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { listener, producer })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    pub async fn run(self) -> Result<()> {
        info!("Render server listening on {}", self.local_addr()?);
        loop {
            let (stream, peer) = self.listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed for {}: {}", peer, e);
            }
            let producer = Arc::clone(&self.producer);
            tokio::spawn(async move {
                match serve_connection(stream, producer).await {
                    Ok(stats) => debug!("Served {}: {:?}", peer, stats),
                    Err(e) => warn!("Connection {} failed: {:#}", peer, e),
                }
            });
        }
    }
}

/// Handle one request: read it, produce the root, stream the render.
///
/// The root component is awaited before rendering, so the base chunk always
/// carries its expansion. A root that fails closes the stream without records.
pub async fn serve_connection<S>(stream: S, producer: Arc<dyn NodeProducer>) -> Result<RenderStats>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let record = read_record(&mut reader)
        .await?
        .context("Connection closed before the request record")?;
    let request = RenderRequest::decode(&record).context("Invalid render request")?;
    info!("Render request for {}", request.component);

    let root = match producer
        .produce(&request.component, &request.props)
        .resolve()
        .await
    {
        Ok(root) => root,
        Err(reason) => {
            error!("Root component {} failed: {}", request.component, reason);
            write_half.shutdown().await?;
            anyhow::bail!("Root component {} failed: {}", request.component, reason);
        }
    };

    let stats = render_to_stream(root, producer, &mut write_half).await?;
    Ok(stats)
}
