use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::metadata::redact;
use crate::notifier::Notifier;
use crate::progress::task::ProgressTask;
use crate::status::{ProgressStatus, ServiceStatus};

/// Turns notifications into structured log events under the `laneswap::notify` target.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify_status_change(&self, service_id: &str, old: ServiceStatus, new: ServiceStatus) -> anyhow::Result<()> {
        if new > old {
            warn!(target: "laneswap::notify", service_id, %old, %new, "service status degraded");
        } else {
            info!(target: "laneswap::notify", service_id, %old, %new, "service status changed");
        }
        Ok(())
    }

    async fn notify_error(&self, service_id: &str, message: &str) -> anyhow::Result<()> {
        error!(target: "laneswap::notify", service_id, reason = message, "service reported an error");
        Ok(())
    }

    async fn notify_stale_service(&self, service_id: &str, last_heartbeat_at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        match last_heartbeat_at {
            None => {
                warn!(target: "laneswap::notify", service_id, "service never sent a heartbeat and is now stale");
            }
            Some(at) => {
                warn!(target: "laneswap::notify", service_id, last_heartbeat_at = %at.to_rfc3339(), "service is stale");
            }
        }
        Ok(())
    }

    async fn notify_service_recovery(&self, service_id: &str) -> anyhow::Result<()> {
        info!(target: "laneswap::notify", service_id, "service recovered");
        Ok(())
    }

    async fn notify_task_finished(&self, task: &ProgressTask) -> anyhow::Result<()> {
        let metadata = serde_json::Value::Object(redact(&task.metadata));
        match task.status {
            ProgressStatus::Failed => {
                warn!(target: "laneswap::notify", task_id = %task.id, service_id = %task.service_id, name = %task.name, %metadata, "task failed");
            }
            _ => {
                info!(target: "laneswap::notify", task_id = %task.id, service_id = %task.service_id, name = %task.name, percent = task.percent_complete(), "task finished");
            }
        }
        Ok(())
    }
}
