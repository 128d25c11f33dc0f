//! Lazy resolver for client-side modules.
//!
//! `resolve` never blocks. The first request for a name starts one load;
//! requests made while it is in flight get a handle to that same load, and the
//! caller renders again once the handle completes. Settled loads stay cached
//! for the lifetime of the resolver.

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Where module implementations come from.
#[async_trait]
pub trait ModuleSource<T>: Send + Sync {
    async fn load(&self, name: &str) -> Result<T, String>;
}

type LoadFuture<T> = Shared<BoxFuture<'static, Result<T, Arc<str>>>>;

/// Result of asking for a module.
pub enum ModuleResolution<T: Clone> {
    Ready(T),
    Pending(PendingModule<T>),
    Failed(Arc<str>),
}

impl<T: Clone> std::fmt::Debug for ModuleResolution<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleResolution::Ready(_) => f.write_str("Ready(..)"),
            ModuleResolution::Pending(handle) => write!(f, "Pending({})", handle.name),
            ModuleResolution::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

/// Handle to an in-flight load. Completes when the load settles, either way.
pub struct PendingModule<T: Clone> {
    name: String,
    load: LoadFuture<T>,
}

impl<T: Clone> PendingModule<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn wait(self) {
        let _ = self.load.await;
    }
}

/// Memoized loader keyed by module name.
///
/// Entries are created on first use and never evicted: a settled module is
/// immutable, so it is valid for as long as the resolver lives. Hold it in a
/// process-wide `Arc` (or a static) to get one registry per process.
pub struct LazyResolver<T: Clone> {
    source: Arc<dyn ModuleSource<T>>,
    modules: Mutex<HashMap<String, LoadFuture<T>>>,
}

impl<T> LazyResolver<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(source: Arc<dyn ModuleSource<T>>) -> Self {
        Self {
            source,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, name: &str) -> ModuleResolution<T> {
        let load = {
            let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
            modules
                .entry(name.to_string())
                .or_insert_with(|| self.start_load(name))
                .clone()
        };

        match load.peek() {
            Some(Ok(module)) => ModuleResolution::Ready(module.clone()),
            Some(Err(reason)) => ModuleResolution::Failed(Arc::clone(reason)),
            None => ModuleResolution::Pending(PendingModule {
                name: name.to_string(),
                load,
            }),
        }
    }

    fn start_load(&self, name: &str) -> LoadFuture<T> {
        debug!("Loading module {}", name);
        let source = Arc::clone(&self.source);
        let module = name.to_string();
        let load = async move {
            source.load(&module).await.map_err(|reason| {
                warn!("Failed to load module {}: {}", module, reason);
                Arc::<str>::from(reason)
            })
        }
        .boxed()
        .shared();

        // Drive the load in the background when a runtime is available;
        // otherwise whoever awaits the handle drives it.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let background = load.clone();
            handle.spawn(async move {
                let _ = background.await;
            });
        }
        load
    }

    /// Wait for `name` to settle and return it.
    pub async fn load(&self, name: &str) -> Result<T, Arc<str>> {
        loop {
            match self.resolve(name) {
                ModuleResolution::Ready(module) => return Ok(module),
                ModuleResolution::Failed(reason) => return Err(reason),
                ModuleResolution::Pending(handle) => handle.wait().await,
            }
        }
    }

    /// Names with an entry, settled or not.
    pub fn known(&self) -> usize {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ModuleSource<String> for CountingSource {
        async fn load(&self, name: &str) -> Result<String, String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if name == "Broken" {
                return Err("no such module".into());
            }
            Ok(format!("impl of {}", name))
        }
    }

    fn resolver() -> (Arc<CountingSource>, LazyResolver<String>) {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
        });
        (source.clone(), LazyResolver::new(source))
    }

    #[tokio::test]
    async fn test_pending_then_ready() {
        let (source, resolver) = resolver();

        let handle = match resolver.resolve("Widget") {
            ModuleResolution::Pending(handle) => handle,
            other => panic!("Expected Pending, got {:?}", other),
        };
        assert_eq!(handle.name(), "Widget");
        handle.wait().await;

        match resolver.resolve("Widget") {
            ModuleResolution::Ready(module) => assert_eq!(module, "impl of Widget"),
            other => panic!("Expected Ready, got {:?}", other),
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_load() {
        let (source, resolver) = resolver();
        let resolver = Arc::new(resolver);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            tasks.push(tokio::spawn(async move { resolver.load("Widget").await }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "impl of Widget");
        }
        for _ in 0..3 {
            assert!(matches!(resolver.resolve("Widget"), ModuleResolution::Ready(_)));
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.known(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_stays_failed() {
        let (source, resolver) = resolver();
        let err = resolver.load("Broken").await.unwrap_err();
        assert_eq!(&*err, "no such module");
        assert!(matches!(resolver.resolve("Broken"), ModuleResolution::Failed(_)));
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_without_runtime_waiter_drives_load() {
        struct Immediate;

        #[async_trait]
        impl ModuleSource<u32> for Immediate {
            async fn load(&self, _name: &str) -> Result<u32, String> {
                Ok(7)
            }
        }

        let resolver = LazyResolver::new(Arc::new(Immediate));
        let value = futures::executor::block_on(resolver.load("Seven")).unwrap();
        assert_eq!(value, 7);
    }
}
