use std::any::type_name;
use std::fmt::Debug;

use async_trait::async_trait;

use crate::progress::task::ProgressTask;
use crate::record::{ErrorEvent, HeartbeatEvent, ServiceRecord, ServiceRegistration};

pub mod memory;

/// Best-effort persistence for the registry.
///
/// The manager never reads services back from an adapter, and every write it
/// issues is bounded by a timeout with failures only logged. An adapter is
/// free to apply its own retention policy.
#[async_trait]
pub trait StorageAdapter: Debug + Send + Sync + 'static {
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    async fn initialize(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;

    async fn store_heartbeat(&self, service_id: &str, event: &HeartbeatEvent) -> anyhow::Result<()>;

    async fn register_service(&self, registration: &ServiceRegistration) -> anyhow::Result<String>;

    async fn get_service_status(&self, service_id: &str) -> anyhow::Result<Option<ServiceRecord>>;

    async fn get_all_services(&self) -> anyhow::Result<Vec<ServiceRecord>>;

    /// Newest `limit` events, oldest first.
    async fn get_service_heartbeats(&self, service_id: &str, limit: usize) -> anyhow::Result<Vec<HeartbeatEvent>>;

    async fn delete_service(&self, service_id: &str) -> anyhow::Result<bool>;

    async fn store_error(&self, error: &ErrorEvent) -> anyhow::Result<()>;

    /// Newest first, optionally restricted to one service.
    async fn get_errors(&self, service_id: Option<&str>, limit: usize, skip: usize) -> anyhow::Result<Vec<ErrorEvent>>;

    async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    #[allow(unused_variables)]
    async fn store_progress(&self, task: &ProgressTask) -> anyhow::Result<()> {
        Ok(())
    }
}
