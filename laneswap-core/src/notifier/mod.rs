use std::any::type_name;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::progress::task::ProgressTask;
use crate::status::ServiceStatus;

pub mod log;

/// Receiver of registry transitions.
///
/// Every configured notifier is invoked independently, under a per-call
/// timeout, and its errors are logged by the manager and then dropped.
#[async_trait]
pub trait Notifier: Debug + Send + Sync + 'static {
    fn name(&self) -> &str {
        type_name::<Self>()
    }

    async fn notify_status_change(&self, service_id: &str, old: ServiceStatus, new: ServiceStatus) -> anyhow::Result<()>;

    async fn notify_error(&self, service_id: &str, message: &str) -> anyhow::Result<()>;

    async fn notify_stale_service(&self, service_id: &str, last_heartbeat_at: Option<DateTime<Utc>>) -> anyhow::Result<()>;

    async fn notify_service_recovery(&self, service_id: &str) -> anyhow::Result<()>;

    #[allow(unused_variables)]
    async fn notify_task_finished(&self, task: &ProgressTask) -> anyhow::Result<()> {
        Ok(())
    }
}
