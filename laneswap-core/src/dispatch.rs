use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::future::join_all;
use tracing::{debug, trace, warn};

use crate::notifier::Notifier;
use crate::storage::StorageAdapter;

/// Fans calls out to the registered storage adapters and notifiers.
///
/// Each call runs as its own task under a timeout, so a panicking, failing
/// or hung collaborator only produces a log line. Adapter lists are swapped
/// atomically and may grow while calls are in flight.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    storages: ArcSwap<Vec<Arc<dyn StorageAdapter>>>,
    notifiers: ArcSwap<Vec<Arc<dyn Notifier>>>,
    storage_timeout: Duration,
    notifier_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(storage_timeout: Duration, notifier_timeout: Duration) -> Self {
        Self {
            storages: ArcSwap::from_pointee(Vec::new()),
            notifiers: ArcSwap::from_pointee(Vec::new()),
            storage_timeout,
            notifier_timeout,
        }
    }

    pub(crate) fn add_storage(&self, storage: Arc<dyn StorageAdapter>) {
        debug!("add storage adapter {}", storage.name());
        self.storages.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(storage.clone());
            next
        });
    }

    pub(crate) fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        debug!("add notifier {}", notifier.name());
        self.notifiers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(notifier.clone());
            next
        });
    }

    pub(crate) fn storages(&self) -> Arc<Vec<Arc<dyn StorageAdapter>>> {
        self.storages.load_full()
    }

    pub(crate) fn notifiers(&self) -> Arc<Vec<Arc<dyn Notifier>>> {
        self.notifiers.load_full()
    }

    pub(crate) async fn each_storage<F, Fut>(&self, operation: &'static str, f: F)
        where
            F: Fn(Arc<dyn StorageAdapter>) -> Fut,
            Fut: Future<Output=anyhow::Result<()>> + Send + 'static,
    {
        let storages = self.storages();
        let calls = storages.iter().map(|storage| {
            guarded("storage", storage.name().to_string(), operation, self.storage_timeout, f(storage.clone()))
        });
        join_all(calls).await;
    }

    pub(crate) async fn each_notifier<F, Fut>(&self, operation: &'static str, f: F)
        where
            F: Fn(Arc<dyn Notifier>) -> Fut,
            Fut: Future<Output=anyhow::Result<()>> + Send + 'static,
    {
        let notifiers = self.notifiers();
        let calls = notifiers.iter().map(|notifier| {
            guarded("notifier", notifier.name().to_string(), operation, self.notifier_timeout, f(notifier.clone()))
        });
        join_all(calls).await;
    }

    /// Asks the adapters in registration order and returns the first answer.
    pub(crate) async fn first_storage<T, F, Fut>(&self, operation: &'static str, f: F) -> Option<T>
        where
            T: Send + 'static,
            F: Fn(Arc<dyn StorageAdapter>) -> Fut,
            Fut: Future<Output=anyhow::Result<T>> + Send + 'static,
    {
        for storage in self.storages().iter() {
            let name = storage.name().to_string();
            match run_isolated(self.storage_timeout, f(storage.clone())).await {
                Ok(value) => return Some(value),
                Err(error) => {
                    warn!("storage {} failed to {}: {:#}", name, operation, error);
                }
            }
        }
        None
    }

    pub(crate) async fn storage_health(&self) -> Vec<(String, bool)> {
        let storages = self.storages();
        let checks = storages.iter().map(|storage| {
            let name = storage.name().to_string();
            let storage = storage.clone();
            async move {
                let healthy = match run_isolated(self.storage_timeout, async move { storage.health_check().await }).await {
                    Ok(healthy) => healthy,
                    Err(error) => {
                        warn!("storage {} health check failed: {:#}", name, error);
                        false
                    }
                };
                (name, healthy)
            }
        });
        join_all(checks).await
    }
}

pub(crate) async fn guarded<Fut>(kind: &'static str, name: String, operation: &'static str, timeout: Duration, call: Fut) -> bool
    where
        Fut: Future<Output=anyhow::Result<()>> + Send + 'static,
{
    match run_isolated(timeout, call).await {
        Ok(()) => {
            trace!("{} {} completed {}", kind, name, operation);
            true
        }
        Err(error) => {
            warn!("{} {} failed to {}: {:#}", kind, name, operation, error);
            false
        }
    }
}

async fn run_isolated<T, Fut>(timeout: Duration, call: Fut) -> anyhow::Result<T>
    where
        T: Send + 'static,
        Fut: Future<Output=anyhow::Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(tokio::time::timeout(timeout, call));
    match handle.await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(anyhow::anyhow!("call timeout after {:?}", timeout)),
        Err(join_error) => Err(anyhow::anyhow!("call aborted: {}", join_error)),
    }
}
