use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use chrono::Utc;
use dashmap::DashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::settings::ManagerSettings;
use crate::config::LaneswapConfig;
use crate::dispatch::{self, Dispatcher};
use crate::error::{Error, Result};
use crate::ext::{check_id, random_id};
use crate::metadata::{self, Metadata};
use crate::notifier::Notifier;
use crate::progress::task::ProgressTask;
use crate::record::{ErrorEvent, HeartbeatEvent, ServiceRecord, ServiceRegistration, StatusSummary};
use crate::status::ServiceStatus;
use crate::storage::memory::MemoryStorage;
use crate::storage::StorageAdapter;

mod sweep;

const FALLBACK_ERROR_LIMIT: usize = 1000;

/// Handle to the service registry.
///
/// Cloning is cheap and every clone refers to the same registry, so one
/// manager is built at startup and handed to whoever needs it. The registry
/// sits behind a single lock that is never held across an `.await`; storage
/// and notifier calls are issued after it is released, from the snapshot
/// taken while it was held.
#[derive(Clone)]
pub struct HeartbeatManager {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    registry: Mutex<HashMap<String, ServiceRecord>>,
    pub(crate) dispatcher: Dispatcher,
    settings: ManagerSettings,
    stale_threshold: chrono::Duration,
    fallback: MemoryStorage,
    pub(crate) tasks: DashMap<String, ProgressTask>,
    sweeper: tokio::sync::Mutex<Option<sweep::SweepTask>>,
}

impl Debug for HeartbeatManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatManager")
            .field("services", &self.len())
            .field("settings", &self.inner.settings)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl HeartbeatManager {
    pub fn new(settings: ManagerSettings) -> Result<Self> {
        settings.validate()?;
        let stale_threshold = chrono::Duration::from_std(settings.stale_threshold)
            .map_err(|_| Error::Config(format!("stale_threshold {:?} is out of range", settings.stale_threshold)))?;
        let fallback = MemoryStorage::with_capacity(settings.history_limit, FALLBACK_ERROR_LIMIT);
        let inner = Inner {
            registry: Mutex::new(HashMap::new()),
            dispatcher: Dispatcher::new(settings.storage_timeout, settings.notifier_timeout),
            settings,
            stale_threshold,
            fallback,
            tasks: DashMap::new(),
            sweeper: tokio::sync::Mutex::new(None),
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub fn from_config(config: &LaneswapConfig) -> Result<Self> {
        Self::new(ManagerSettings::from(config))
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Registers a storage adapter. When the sweep is already running the
    /// adapter is initialized right away, otherwise on [`HeartbeatManager::start`].
    pub async fn add_storage(&self, storage: Arc<dyn StorageAdapter>) {
        if self.is_running().await {
            let name = storage.name().to_string();
            let adapter = storage.clone();
            dispatch::guarded("storage", name, "initialize", self.inner.settings.storage_timeout, async move {
                adapter.initialize().await
            }).await;
        }
        self.inner.dispatcher.add_storage(storage);
    }

    pub fn add_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.inner.dispatcher.add_notifier(notifier);
    }

    pub async fn register(&self, name: impl Into<String>, id: Option<String>, metadata: Option<Metadata>) -> Result<String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Validation("service name must not be empty".to_string()));
        }
        if let Some(id) = &id {
            check_id(id)?;
        }
        let metadata = metadata.unwrap_or_default();
        metadata::validate(&metadata)?;
        let registration = {
            let mut registry = self.inner.registry.lock();
            let id = match id {
                Some(id) => {
                    if registry.contains_key(&id) {
                        return Err(Error::DuplicateId(id));
                    }
                    id
                }
                None => {
                    let mut id = random_id();
                    while registry.contains_key(&id) {
                        id = random_id();
                    }
                    id
                }
            };
            let registration = ServiceRegistration {
                id,
                name,
                metadata,
                created_at: Utc::now(),
            };
            registry.insert(registration.id.clone(), ServiceRecord::new(&registration));
            registration
        };
        info!("registered service {} ({})", registration.id, registration.name);
        let id = registration.id.clone();
        let registration = Arc::new(registration);
        self.inner.dispatcher.each_storage("register service", |storage| {
            let registration = registration.clone();
            async move {
                let stored_id = storage.register_service(&registration).await?;
                if stored_id != registration.id {
                    debug!("storage {} keeps service {} as {}", storage.name(), registration.id, stored_id);
                }
                Ok(())
            }
        }).await;
        Ok(id)
    }

    pub async fn heartbeat(
        &self,
        service_id: &str,
        status: ServiceStatus,
        message: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<ServiceRecord> {
        if let Some(metadata) = &metadata {
            metadata::validate(metadata)?;
        }
        let now = Utc::now();
        let event = HeartbeatEvent::new(status, message.clone(), metadata.clone().unwrap_or_default(), now);
        let (snapshot, old_status) = {
            let mut registry = self.inner.registry.lock();
            let record = registry
                .get_mut(service_id)
                .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;
            let old_status = record.status;
            record.status = status;
            record.last_heartbeat_at = Some(now);
            record.last_message = message.clone();
            if let Some(metadata) = &metadata {
                metadata::merge(&mut record.metadata, metadata);
            }
            record.push_history(event.clone(), self.inner.settings.history_limit);
            (record.clone(), old_status)
        };
        trace!("heartbeat from {}: {}", service_id, status);
        self.persist_event(service_id, event).await;
        if status == ServiceStatus::Error {
            let reason = message.clone().unwrap_or_else(|| "service reported error status".to_string());
            self.store_error(ErrorEvent::new(service_id, reason, metadata.unwrap_or_default())).await;
        }
        self.notify_transition(service_id, old_status, status, message.as_deref()).await;
        Ok(snapshot)
    }

    pub fn get(&self, service_id: &str) -> Result<ServiceRecord> {
        self.inner.registry
            .lock()
            .get(service_id)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))
    }

    /// Most severe first, then by name.
    pub fn list(&self, filter: Option<ServiceStatus>) -> Vec<ServiceRecord> {
        let registry = self.inner.registry.lock();
        registry
            .values()
            .filter(|record| filter.map_or(true, |status| record.status == status))
            .cloned()
            .sorted_by(|a, b| {
                b.status.cmp(&a.status)
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .collect()
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.inner.registry.lock().contains_key(service_id)
    }

    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> StatusSummary {
        let registry = self.inner.registry.lock();
        StatusSummary::from_statuses(registry.values().map(|record| record.status))
    }

    /// Newest `limit` history entries of a service, oldest first.
    pub fn heartbeats(&self, service_id: &str, limit: usize) -> Result<Vec<HeartbeatEvent>> {
        let registry = self.inner.registry.lock();
        let record = registry
            .get(service_id)
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;
        let skip = record.history.len().saturating_sub(limit);
        Ok(record.history.iter().skip(skip).cloned().collect())
    }

    pub async fn delete(&self, service_id: &str) -> bool {
        let existed = self.inner.registry.lock().remove(service_id).is_some();
        if existed {
            self.inner.tasks.retain(|_, task| task.service_id != service_id);
            info!("deleted service {}", service_id);
            let id = service_id.to_string();
            self.inner.dispatcher.each_storage("delete service", |storage| {
                let id = id.clone();
                async move {
                    storage.delete_service(&id).await?;
                    Ok(())
                }
            }).await;
        }
        existed
    }

    /// Error log as kept by the first storage adapter that answers, newest
    /// first. Without an answering adapter the manager's own bounded log is used.
    pub async fn recent_errors(&self, service_id: Option<&str>, limit: usize) -> Vec<ErrorEvent> {
        let filter = service_id.map(str::to_string);
        let answer = self.inner.dispatcher
            .first_storage("get errors", |storage| {
                let filter = filter.clone();
                async move { storage.get_errors(filter.as_deref(), limit, 0).await }
            })
            .await;
        match answer {
            Some(errors) => errors,
            None => self.inner.fallback.get_errors(service_id, limit, 0).await.unwrap_or_default(),
        }
    }

    pub async fn storage_health(&self) -> Vec<(String, bool)> {
        self.inner.dispatcher.storage_health().await
    }

    pub(crate) async fn store_error(&self, error: ErrorEvent) {
        if let Err(e) = self.inner.fallback.store_error(&error).await {
            warn!("failed to keep error of {} in memory: {:#}", error.service_id, e);
        }
        let error = Arc::new(error);
        self.inner.dispatcher.each_storage("store error", |storage| {
            let error = error.clone();
            async move { storage.store_error(&error).await }
        }).await;
    }

    async fn persist_event(&self, service_id: &str, event: HeartbeatEvent) {
        let id = service_id.to_string();
        let event = Arc::new(event);
        self.inner.dispatcher.each_storage("store heartbeat", |storage| {
            let id = id.clone();
            let event = event.clone();
            async move { storage.store_heartbeat(&id, &event).await }
        }).await;
    }

    async fn notify_transition(&self, service_id: &str, old: ServiceStatus, new: ServiceStatus, message: Option<&str>) {
        if old == new {
            return;
        }
        info!("service {} status changed {} -> {}", service_id, old, new);
        let id = service_id.to_string();
        let dispatcher = &self.inner.dispatcher;
        dispatcher.each_notifier("notify status change", |notifier| {
            let id = id.clone();
            async move { notifier.notify_status_change(&id, old, new).await }
        }).await;
        if old.is_stale() && !new.is_stale() {
            info!("service {} recovered from stale", service_id);
            dispatcher.each_notifier("notify service recovery", |notifier| {
                let id = id.clone();
                async move { notifier.notify_service_recovery(&id).await }
            }).await;
        }
        if new == ServiceStatus::Error {
            let reason = message.unwrap_or("service reported error status").to_string();
            dispatcher.each_notifier("notify error", |notifier| {
                let id = id.clone();
                let reason = reason.clone();
                async move { notifier.notify_error(&id, &reason).await }
            }).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use crate::config::settings::ManagerSettings;
    use crate::error::Error;
    use crate::manager::HeartbeatManager;
    use crate::metadata::Metadata;
    use crate::status::ServiceStatus;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::StorageAdapter;
    use crate::testkit::{FailingNotifier, FailingStorage, HangingNotifier, RecordingNotifier};

    fn manager() -> HeartbeatManager {
        let settings = ManagerSettings::builder()
            .history_limit(5)
            .notifier_timeout(Duration::from_millis(100))
            .storage_timeout(Duration::from_millis(100))
            .build();
        HeartbeatManager::new(settings).unwrap()
    }

    fn metadata(value: serde_json::Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_register_generates_distinct_ids() -> anyhow::Result<()> {
        let manager = manager();
        let mut ids = HashSet::new();
        for i in 0..200 {
            ids.insert(manager.register(format!("worker-{}", i), None, None).await?);
        }
        assert_eq!(ids.len(), 200);
        assert_eq!(manager.len(), 200);
        Ok(())
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_id() -> anyhow::Result<()> {
        let manager = manager();
        let id = manager.register("api", Some("api-1".to_string()), None).await?;
        assert_eq!(id, "api-1");
        let result = manager.register("api again", Some("api-1".to_string()), None).await;
        assert_eq!(result, Err(Error::DuplicateId("api-1".to_string())));
        assert_eq!(manager.get("api-1")?.name, "api");
        assert!(matches!(manager.register("  ", None, None).await, Err(Error::Validation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_new_service_is_unknown() -> anyhow::Result<()> {
        let manager = manager();
        let id = manager.register("Test Service", None, Some(metadata(json!({"version": "1.0.0"})))).await?;
        let record = manager.get(&id)?;
        assert_eq!(record.status, ServiceStatus::Unknown);
        assert_eq!(record.metadata["version"], json!("1.0.0"));
        assert!(record.last_heartbeat_at.is_none());
        assert!(record.history.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_service() -> anyhow::Result<()> {
        let manager = manager();
        manager.register("api", None, None).await?;
        let result = manager.heartbeat("nonexistent", ServiceStatus::Healthy, None, None).await;
        assert_eq!(result, Err(Error::ServiceNotFound("nonexistent".to_string())));
        assert_eq!(manager.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_heartbeat_updates_record() -> anyhow::Result<()> {
        let manager = manager();
        let id = manager.register("api", None, Some(metadata(json!({"version": "1.0", "region": "eu"})))).await?;
        let record = manager.heartbeat(
            &id,
            ServiceStatus::Warning,
            Some("queue growing".to_string()),
            Some(metadata(json!({"version": "1.1", "queue": 12}))),
        ).await?;
        assert_eq!(record.status, ServiceStatus::Warning);
        assert_eq!(record.last_message.as_deref(), Some("queue growing"));
        assert!(record.last_heartbeat_at.is_some());
        assert_eq!(record.metadata, metadata(json!({"version": "1.1", "region": "eu", "queue": 12})));
        assert_eq!(record.history.len(), 1);
        assert_eq!(manager.get(&id)?, record);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_change_notified_once() -> anyhow::Result<()> {
        let manager = manager();
        let recording = Arc::new(RecordingNotifier::default());
        manager.add_notifier(recording.clone());
        let id = manager.register("api", None, None).await?;
        manager.heartbeat(&id, ServiceStatus::Healthy, None, None).await?;
        manager.heartbeat(&id, ServiceStatus::Healthy, None, None).await?;
        assert_eq!(recording.status_changes(), vec![(id.clone(), ServiceStatus::Unknown, ServiceStatus::Healthy)]);
        manager.heartbeat(&id, ServiceStatus::Busy, None, None).await?;
        assert_eq!(recording.status_changes().len(), 2);
        assert!(recording.recoveries().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_history_keeps_most_recent() -> anyhow::Result<()> {
        let manager = manager();
        let id = manager.register("api", None, None).await?;
        for i in 0..12 {
            manager.heartbeat(&id, ServiceStatus::Healthy, Some(format!("beat {}", i)), None).await?;
        }
        let record = manager.get(&id)?;
        let messages = record.history.iter().filter_map(|e| e.message.clone()).collect::<Vec<_>>();
        assert_eq!(messages, (7..12).map(|i| format!("beat {}", i)).collect::<Vec<_>>());
        let newest = manager.heartbeats(&id, 2)?;
        assert_eq!(newest.iter().filter_map(|e| e.message.as_deref()).collect::<Vec<_>>(), vec!["beat 10", "beat 11"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_error_heartbeat_notifies_and_logs() -> anyhow::Result<()> {
        let manager = manager();
        let recording = Arc::new(RecordingNotifier::default());
        let storage = Arc::new(MemoryStorage::new());
        manager.add_notifier(recording.clone());
        manager.add_storage(storage.clone()).await;
        let id = manager.register("db", None, None).await?;
        manager.heartbeat(&id, ServiceStatus::Error, Some("disk full".to_string()), None).await?;
        manager.heartbeat(&id, ServiceStatus::Error, Some("disk still full".to_string()), None).await?;
        assert_eq!(recording.errors(), vec![(id.clone(), "disk full".to_string())]);
        let errors = manager.recent_errors(Some(&id), 10).await;
        assert_eq!(errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>(), vec!["disk still full", "disk full"]);
        assert_eq!(storage.get_service_heartbeats(&id, 10).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_error_log_without_storage() -> anyhow::Result<()> {
        let manager = manager();
        let api = manager.register("api", None, None).await?;
        let db = manager.register("db", None, None).await?;
        manager.heartbeat(&api, ServiceStatus::Error, Some("timeout".to_string()), None).await?;
        manager.heartbeat(&db, ServiceStatus::Error, None, None).await?;
        assert_eq!(manager.recent_errors(None, 10).await.len(), 2);
        let errors = manager.recent_errors(Some(&db), 10).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "service reported error status");
        Ok(())
    }

    #[tokio::test]
    async fn test_collaborator_failures_never_reach_caller() -> anyhow::Result<()> {
        let manager = manager();
        let recording = Arc::new(RecordingNotifier::default());
        manager.add_storage(Arc::new(FailingStorage)).await;
        manager.add_notifier(Arc::new(FailingNotifier));
        manager.add_notifier(Arc::new(HangingNotifier));
        manager.add_notifier(recording.clone());
        let id = manager.register("api", None, None).await?;
        let record = tokio::time::timeout(
            Duration::from_secs(2),
            manager.heartbeat(&id, ServiceStatus::Healthy, None, None),
        ).await??;
        assert_eq!(record.status, ServiceStatus::Healthy);
        assert_eq!(recording.status_changes().len(), 1);
        assert!(manager.delete(&id).await);
        assert!(manager.recent_errors(None, 10).await.is_empty());
        let health = manager.storage_health().await;
        assert_eq!(health.len(), 1);
        assert!(!health[0].1);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_and_summary() -> anyhow::Result<()> {
        let manager = manager();
        let a = manager.register("alpha", None, None).await?;
        let b = manager.register("beta", None, None).await?;
        let c = manager.register("gamma", None, None).await?;
        manager.heartbeat(&a, ServiceStatus::Healthy, None, None).await?;
        manager.heartbeat(&b, ServiceStatus::Error, None, None).await?;
        manager.heartbeat(&c, ServiceStatus::Healthy, None, None).await?;
        let names = manager.list(None).into_iter().map(|r| r.name).collect::<Vec<_>>();
        assert_eq!(names, vec!["beta", "alpha", "gamma"]);
        let healthy = manager.list(Some(ServiceStatus::Healthy));
        assert_eq!(healthy.len(), 2);
        let summary = manager.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.count(ServiceStatus::Healthy), 2);
        assert_eq!(summary.count(ServiceStatus::Error), 1);
        assert_eq!(summary.count(ServiceStatus::Stale), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete() -> anyhow::Result<()> {
        let manager = manager();
        let storage = Arc::new(MemoryStorage::new());
        manager.add_storage(storage.clone()).await;
        let id = manager.register("api", None, None).await?;
        assert!(storage.get_service_status(&id).await?.is_some());
        assert!(manager.delete(&id).await);
        assert!(!manager.delete(&id).await);
        assert!(manager.get(&id).unwrap_err().is_not_found());
        assert!(storage.get_service_status(&id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_heartbeats() -> anyhow::Result<()> {
        let manager = manager();
        let recording = Arc::new(RecordingNotifier::default());
        manager.add_notifier(recording.clone());
        let id = manager.register("api", None, None).await?;
        let mut handles = vec![];
        for i in 0..50 {
            let manager = manager.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                manager.heartbeat(&id, ServiceStatus::Healthy, Some(i.to_string()), None).await
            }));
        }
        for handle in handles {
            handle.await??;
        }
        assert_eq!(recording.status_changes().len(), 1);
        assert_eq!(manager.get(&id)?.history.len(), 5);
        Ok(())
    }
}
