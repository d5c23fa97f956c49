use std::collections::VecDeque;

use ahash::HashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::progress::task::ProgressTask;
use crate::record::{ErrorEvent, HeartbeatEvent, ServiceRecord, ServiceRegistration};
use crate::storage::StorageAdapter;

const DEFAULT_MAX_HEARTBEATS: usize = 1000;
const DEFAULT_MAX_ERRORS: usize = 10_000;

/// Process-local storage adapter, bounded per service and for the error log.
#[derive(Debug)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    max_heartbeats: usize,
    max_errors: usize,
}

#[derive(Debug, Default)]
struct Inner {
    services: HashMap<String, ServiceRecord>,
    heartbeats: HashMap<String, VecDeque<HeartbeatEvent>>,
    errors: VecDeque<ErrorEvent>,
    progress: HashMap<String, ProgressTask>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HEARTBEATS, DEFAULT_MAX_ERRORS)
    }

    pub fn with_capacity(max_heartbeats: usize, max_errors: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_heartbeats: max_heartbeats.max(1),
            max_errors: max_errors.max(1),
        }
    }

    pub fn progress(&self, task_id: &str) -> Option<ProgressTask> {
        self.inner.read().progress.get(task_id).cloned()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn store_heartbeat(&self, service_id: &str, event: &HeartbeatEvent) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        if let Some(service) = inner.services.get_mut(service_id) {
            service.status = event.status;
            service.last_heartbeat_at = Some(event.timestamp);
            service.last_message = event.message.clone();
        }
        let events = inner.heartbeats.entry(service_id.to_string()).or_insert_with(VecDeque::new);
        events.push_back(event.clone());
        while events.len() > self.max_heartbeats {
            events.pop_front();
        }
        trace!("memory storage stored heartbeat for {}", service_id);
        Ok(())
    }

    async fn register_service(&self, registration: &ServiceRegistration) -> anyhow::Result<String> {
        let mut inner = self.inner.write();
        inner.services.insert(registration.id.clone(), ServiceRecord::new(registration));
        Ok(registration.id.clone())
    }

    async fn get_service_status(&self, service_id: &str) -> anyhow::Result<Option<ServiceRecord>> {
        Ok(self.inner.read().services.get(service_id).cloned())
    }

    async fn get_all_services(&self) -> anyhow::Result<Vec<ServiceRecord>> {
        Ok(self.inner.read().services.values().cloned().collect())
    }

    async fn get_service_heartbeats(&self, service_id: &str, limit: usize) -> anyhow::Result<Vec<HeartbeatEvent>> {
        let inner = self.inner.read();
        let events = match inner.heartbeats.get(service_id) {
            None => Vec::new(),
            Some(events) => {
                let skip = events.len().saturating_sub(limit);
                events.iter().skip(skip).cloned().collect()
            }
        };
        Ok(events)
    }

    async fn delete_service(&self, service_id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.write();
        inner.heartbeats.remove(service_id);
        inner.progress.retain(|_, task| task.service_id != service_id);
        Ok(inner.services.remove(service_id).is_some())
    }

    async fn store_error(&self, error: &ErrorEvent) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        inner.errors.push_back(error.clone());
        while inner.errors.len() > self.max_errors {
            inner.errors.pop_front();
        }
        Ok(())
    }

    async fn get_errors(&self, service_id: Option<&str>, limit: usize, skip: usize) -> anyhow::Result<Vec<ErrorEvent>> {
        let inner = self.inner.read();
        let errors = inner.errors
            .iter()
            .rev()
            .filter(|e| service_id.map_or(true, |id| e.service_id == id))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect();
        Ok(errors)
    }

    async fn store_progress(&self, task: &ProgressTask) -> anyhow::Result<()> {
        self.inner.write().progress.insert(task.id.clone(), task.clone());
        Ok(())
    }
}
