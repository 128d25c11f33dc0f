//! Client session pipeline.
//!
//! Transport -> reader loop -> Patcher -> watch channel. Each published value
//! is one refresh of the consumer's view.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::streaming::channel::PatchStats;
use crate::streaming::patcher::{PatchedTree, Patcher};
use crate::streaming::protocol::{read_chunk, RenderRequest};
use crate::transport::Transport;
use crate::tree::Props;

/// What the consumer currently shows for a session
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    /// Nothing has arrived yet
    Loading,
    /// Base installed; possibly still being patched
    Ready(Arc<PatchedTree>),
    /// Session-fatal error; replaces the whole view
    Failed(String),
}

impl ViewState {
    pub fn tree(&self) -> Option<&PatchedTree> {
        match self {
            ViewState::Ready(tree) => Some(tree),
            _ => None,
        }
    }
}

/// Read one session's chunks in arrival order and publish every change.
///
/// Returns once the stream closes. An early close with placeholders still
/// outstanding is reported but not an error; the last published tree stays.
pub async fn run_session<R>(stream: R, view: &watch::Sender<ViewState>) -> Result<PatchStats>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut patcher = Patcher::new();
    patcher.begin();

    loop {
        let chunk = match read_chunk(&mut reader).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                view.send_replace(ViewState::Failed(e.to_string()));
                return Err(e);
            }
        };

        match patcher.apply(chunk) {
            Ok(outcome) if outcome.is_refresh() => {
                if let Some(tree) = patcher.tree() {
                    view.send_replace(ViewState::Ready(Arc::new(tree.clone())));
                }
            }
            Ok(_) => {}
            Err(e) => {
                view.send_replace(ViewState::Failed(e.to_string()));
                return Err(e);
            }
        }
    }

    if let Err(e) = patcher.finish() {
        if e.is_session_fatal() {
            view.send_replace(ViewState::Failed(e.to_string()));
            return Err(e);
        }
    }

    debug!("Client session closed: {:?}", patcher.stats());
    Ok(patcher.stats().clone())
}

/// Wait until the session's reader loop is finished and return the final view.
pub async fn settled(mut view: watch::Receiver<ViewState>) -> ViewState {
    while view.changed().await.is_ok() {}
    let state = view.borrow().clone();
    state
}

/// Client sessions keyed by `(component, props)`.
///
/// Process-scoped and non-evicting: an entry is created on first mount and
/// reused by every later mount with the same key, in flight or finished.
pub struct SessionCache {
    transport: Arc<dyn Transport>,
    sessions: Mutex<HashMap<String, watch::Receiver<ViewState>>>,
}

impl SessionCache {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Mount `component` with `props`.
    ///
    /// The first mount of a key opens the transport and starts the reader loop;
    /// concurrent or later mounts share it. Must be called within a tokio runtime.
    pub fn mount(&self, component: &str, props: Props) -> Result<watch::Receiver<ViewState>> {
        let request = RenderRequest::new(component, props);
        let key = request.cache_key()?;

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = sessions.get(&key) {
            debug!("Reusing session for {}", key);
            return Ok(existing.clone());
        }

        let (tx, rx) = watch::channel(ViewState::Loading);
        sessions.insert(key, rx.clone());
        drop(sessions);

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            info!("Opening session for {}", request.component);
            let stream = match transport.open(&request).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to open session for {}: {}", request.component, e);
                    tx.send_replace(ViewState::Failed(e.to_string()));
                    return;
                }
            };
            if let Err(e) = run_session(stream, &tx).await {
                warn!("Session for {} failed: {}", request.component, e);
            }
        });

        Ok(rx)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::streaming::protocol::Chunk;
    use crate::transport::ChunkStream;
    use crate::tree::{props, Node, PlaceholderId};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn encode_all(chunks: &[Chunk]) -> Vec<u8> {
        let mut wire = Vec::new();
        for chunk in chunks {
            wire.extend_from_slice(&chunk.encode().unwrap());
        }
        wire
    }

    #[tokio::test]
    async fn test_run_session_publishes_each_refresh() {
        let wire = encode_all(&[
            Chunk::base(Node::Sequence(vec![
                Node::placeholder(PlaceholderId::new(0)),
                Node::placeholder(PlaceholderId::new(1)),
            ])),
            Chunk::resolved(PlaceholderId::new(1), Node::text("b")),
            Chunk::resolved(PlaceholderId::new(7), Node::text("stray")),
            Chunk::resolved(PlaceholderId::new(0), Node::text("a")),
        ]);

        let (tx, mut rx) = watch::channel(ViewState::Loading);
        let stats = run_session(wire.as_slice(), &tx).await.unwrap();
        assert_eq!(stats.chunks_read, 4);
        assert_eq!(stats.patched, 2);
        assert_eq!(stats.dropped, 1);

        assert!(rx.has_changed().unwrap());
        let view = rx.borrow_and_update().clone();
        assert_eq!(
            view.tree().unwrap().root,
            Node::Sequence(vec![Node::text("a"), Node::text("b")])
        );
    }

    #[tokio::test]
    async fn test_decode_error_fails_whole_view() {
        let mut wire = encode_all(&[Chunk::base(Node::placeholder(PlaceholderId::new(0)))]);
        wire.extend_from_slice(b"{\"target\":\"C:0\",\"data\":{\"kind\":\"bogus\"}}\n");

        let (tx, rx) = watch::channel(ViewState::Loading);
        let err = run_session(wire.as_slice(), &tx).await.unwrap_err();
        assert!(matches!(err, StreamError::Decode(_)));
        assert!(matches!(&*rx.borrow(), ViewState::Failed(_)));
    }

    #[tokio::test]
    async fn test_early_close_keeps_last_tree() {
        let wire = encode_all(&[Chunk::base(Node::placeholder(PlaceholderId::new(0)))]);
        let (tx, rx) = watch::channel(ViewState::Loading);
        run_session(wire.as_slice(), &tx).await.unwrap();
        assert_eq!(
            rx.borrow().tree().unwrap().root,
            Node::placeholder(PlaceholderId::new(0))
        );
    }

    struct CountingTransport {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn open(&self, _request: &RenderRequest) -> Result<ChunkStream> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            let wire = encode_all(&[Chunk::base(Node::text("shared"))]);
            Ok(Box::new(std::io::Cursor::new(wire)))
        }
    }

    #[tokio::test]
    async fn test_identical_mounts_share_one_fetch() {
        let transport = Arc::new(CountingTransport {
            opens: AtomicUsize::new(0),
        });
        let cache = SessionCache::new(transport.clone());

        let first = cache.mount("PostList", props([("page", Node::number(1))])).unwrap();
        let second = cache.mount("PostList", props([("page", Node::number(1))])).unwrap();
        let other = cache.mount("PostList", props([("page", Node::number(2))])).unwrap();

        let (a, b, _) = tokio::join!(settled(first), settled(second), settled(other));
        assert_eq!(a, b);
        assert_eq!(a.tree().unwrap().root, Node::text("shared"));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);

        // A mount after completion is served from the cache too
        let late = cache.mount("PostList", props([("page", Node::number(1))])).unwrap();
        assert_eq!(settled(late).await, a);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
    }
}
