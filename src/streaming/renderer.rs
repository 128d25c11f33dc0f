//! Renderer for streamed trees.
//!
//! Walks a tree synchronously, expanding server components that are ready and
//! substituting placeholders for the ones still computing. Each deferred
//! computation streams its own chunk once it settles; the writer closes the
//! sink when nothing is left pending.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::streaming::channel::{chunk_channel, ChunkSender, PlaceholderIndex, RenderStats};
use crate::streaming::producer::{NodeProducer, Production};
use crate::streaming::protocol::{write_record, Chunk, ChunkPayload, Target};
use crate::tree::{Node, PlaceholderId, Props, Resolution};

type DeferredFuture = BoxFuture<'static, std::result::Result<Node, String>>;

struct SessionState {
    next_id: u64,
    pending: PlaceholderIndex,
}

/// Server-side context for one render request.
///
/// Owns the id counter and the pending set. Shared between the main walk and
/// every completion continuation.
pub struct RenderSession {
    producer: Arc<dyn NodeProducer>,
    state: Mutex<SessionState>,
    chunks: ChunkSender,
}

impl RenderSession {
    fn new(producer: Arc<dyn NodeProducer>, chunks: ChunkSender) -> Arc<Self> {
        Arc::new(Self {
            producer,
            state: Mutex::new(SessionState {
                next_id: 0,
                pending: PlaceholderIndex::new(),
            }),
            chunks,
        })
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render `node` in this session. Must run inside a tokio runtime, since
    /// deferred computations are spawned onto it.
    fn render(self: &Arc<Self>, node: Node) -> Node {
        match node {
            Node::Leaf(_) | Node::Placeholder { .. } => node,
            Node::Sequence(items) => {
                Node::Sequence(items.into_iter().map(|item| self.render(item)).collect())
            }
            Node::Element {
                tag,
                props,
                children,
            } => Node::Element {
                tag,
                props: self.render_props(props),
                children: Box::new(self.render(*children)),
            },
            Node::LazyRef { name, props } => Node::LazyRef {
                name,
                props: self.render_props(props),
            },
            Node::ComponentRef {
                name,
                props,
                resolution: Resolution::Client,
            } => Node::LazyRef {
                name,
                props: self.render_props(props),
            },
            Node::ComponentRef {
                name,
                props,
                resolution: Resolution::Server,
            } => {
                let production = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    self.producer.produce(&name, &props)
                }))
                .unwrap_or_else(|panic| {
                    let reason = panic_reason(&name, panic);
                    warn!("{}", reason);
                    Production::failed(reason)
                });
                match production {
                    Production::Ready(expansion) => self.render(expansion),
                    Production::Pending(fut) => Node::Placeholder {
                        id: self.defer(name, fut),
                    },
                }
            }
        }
    }

    fn render_props(self: &Arc<Self>, props: Props) -> Props {
        props
            .into_iter()
            .map(|(key, value)| (key, self.render(value)))
            .collect()
    }

    fn allocate(&self) -> PlaceholderId {
        let mut state = self.state();
        let id = PlaceholderId::new(state.next_id);
        state.next_id += 1;
        state.pending.insert(id.clone());
        id
    }

    fn defer(self: &Arc<Self>, name: String, fut: DeferredFuture) -> PlaceholderId {
        let id = self.allocate();
        debug!("Deferred {} behind {}", name, id);

        let session = Arc::clone(self);
        let task_id = id.clone();
        tokio::spawn(async move { session.complete(task_id, name, fut).await });
        id
    }

    /// Completion continuation: render the result in this session, then hand
    /// the chunk to the writer. Nested placeholders are allocated before the
    /// chunk is sent, so the pending set never empties early.
    async fn complete(
        self: Arc<Self>,
        id: PlaceholderId,
        name: String,
        fut: DeferredFuture,
    ) {
        let chunk = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(node)) => match std::panic::catch_unwind(AssertUnwindSafe(|| self.render(node))) {
                Ok(rendered) => Chunk::resolved(id, rendered),
                Err(panic) => Chunk::failed(id, panic_reason(&name, panic)),
            },
            Ok(Err(reason)) => {
                warn!("Deferred {} ({}) failed: {}", name, id, reason);
                Chunk::failed(id, reason)
            }
            Err(panic) => {
                let reason = panic_reason(&name, panic);
                warn!("Deferred {} ({}) panicked: {}", name, id, reason);
                Chunk::failed(id, reason)
            }
        };

        if self.chunks.send(chunk).is_err() {
            // Writer is gone (sink failed); keep running to completion anyway.
            debug!("Dropping chunk for {}: writer closed", name);
        }
    }

    /// Mark `id` written. Returns true when nothing is left pending.
    fn settle(&self, id: &PlaceholderId) -> bool {
        let mut state = self.state();
        state.pending.remove(id);
        state.pending.is_empty()
    }

    fn is_settled(&self) -> bool {
        self.state().pending.is_empty()
    }

    fn allocated(&self) -> u64 {
        self.state().next_id
    }
}

fn panic_reason(name: &str, panic: Box<dyn Any + Send>) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("component {} panicked: {}", name, message)
}

/// Render `root` and stream it to `sink`.
///
/// Writes the base chunk first, then one chunk per deferred subtree in
/// completion order, and shuts the sink down right after the last one. All
/// writes go through this single loop.
///
/// There is no cancellation: if the sink fails, this returns the error but
/// computations already spawned still run to completion.
pub async fn render_to_stream<W>(
    root: Node,
    producer: Arc<dyn NodeProducer>,
    sink: &mut W,
) -> Result<RenderStats>
where
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = chunk_channel();
    let session = RenderSession::new(producer, tx);
    let mut stats = RenderStats::new();

    let base = session.render(root);
    write_record(sink, &Chunk::base(base).encode()?).await?;
    sink.flush().await?;
    stats.chunks_written += 1;

    let mut settled = session.is_settled();
    while !settled {
        let Some(mut chunk) = rx.recv().await else {
            break;
        };

        // A subtree that cannot go on the wire fails on its own
        let record = match chunk.encode() {
            Ok(record) => record,
            Err(e) => {
                let Target::Placeholder(id) = chunk.target.clone() else {
                    return Err(e.into());
                };
                warn!("Cannot encode chunk for {}: {}", id, e);
                chunk = Chunk::failed(id, e.to_string());
                chunk.encode()?
            }
        };
        write_record(sink, &record).await?;
        sink.flush().await?;
        stats.chunks_written += 1;
        if matches!(chunk.payload, ChunkPayload::Error(_)) {
            stats.failed_subtrees += 1;
        }

        settled = match &chunk.target {
            Target::Placeholder(id) => session.settle(id),
            Target::Base => session.is_settled(),
        };
        debug!("Wrote chunk {}", chunk.target);
    }

    sink.shutdown().await?;
    stats.placeholders = session.allocated();
    info!(
        "Render session closed: {} chunks, {} deferred, {} failed",
        stats.chunks_written, stats.placeholders, stats.failed_subtrees
    );
    Ok(stats)
}

// =============================================================================
// Tests
// =============================================================================
