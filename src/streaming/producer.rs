//! Node producers: the opaque content side of a render.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use crate::tree::{Node, Props, Resolution};

/// Output of one component invocation.
pub enum Production {
    /// Expansion known right away; rendered in place.
    Ready(Node),
    /// Expansion still being computed; streamed later behind a placeholder.
    Pending(BoxFuture<'static, Result<Node, String>>),
}

impl Production {
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Node, String>> + Send + 'static,
    {
        Production::Pending(fut.boxed())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Production::Pending(async move { Err(reason) }.boxed())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Production::Ready(_))
    }

    /// Wait for the expansion, whichever way it comes.
    pub async fn resolve(self) -> Result<Node, String> {
        match self {
            Production::Ready(node) => Ok(node),
            Production::Pending(fut) => fut.await,
        }
    }
}

impl std::fmt::Debug for Production {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Production::Ready(node) => f.debug_tuple("Ready").field(node).finish(),
            Production::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Expands server-side component references.
pub trait NodeProducer: Send + Sync {
    fn produce(&self, name: &str, props: &Props) -> Production;
}

type Handler = Arc<dyn Fn(&Props) -> Production + Send + Sync>;

/// Static lookup of components: server handlers plus the names of modules the
/// client loads on its own.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    server: HashMap<String, Handler>,
    client: HashSet<String>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Props) -> Production + Send + Sync + 'static,
    {
        self.server.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn client(mut self, name: impl Into<String>) -> Self {
        self.client.insert(name.into());
        self
    }

    /// Server-registered names win; everything else resolves on the client.
    pub fn resolution_of(&self, name: &str) -> Resolution {
        if self.server.contains_key(name) {
            Resolution::Server
        } else {
            Resolution::Client
        }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.server.contains_key(name) || self.client.contains(name)
    }

    /// Build a reference to `name` with the resolution this registry assigns.
    pub fn reference(&self, name: impl Into<String>, props: Props) -> Node {
        let name = name.into();
        let resolution = self.resolution_of(&name);
        Node::ComponentRef {
            name,
            props,
            resolution,
        }
    }
}

impl NodeProducer for ComponentRegistry {
    fn produce(&self, name: &str, props: &Props) -> Production {
        match self.server.get(name) {
            Some(handler) => handler(props),
            None => Production::failed(format!("unknown server component {:?}", name)),
        }
    }
}
