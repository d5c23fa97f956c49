use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::notifier::Notifier;
use crate::progress::task::ProgressTask;
use crate::record::{ErrorEvent, HeartbeatEvent, ServiceRecord, ServiceRegistration};
use crate::status::ServiceStatus;
use crate::storage::StorageAdapter;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Notice {
    StatusChange(String, ServiceStatus, ServiceStatus),
    Error(String, String),
    Stale(String, Option<DateTime<Utc>>),
    Recovery(String),
    TaskFinished(ProgressTask),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub(crate) fn status_changes(&self) -> Vec<(String, ServiceStatus, ServiceStatus)> {
        self.notices().into_iter().filter_map(|n| match n {
            Notice::StatusChange(id, old, new) => Some((id, old, new)),
            _ => None,
        }).collect()
    }

    pub(crate) fn stale(&self) -> Vec<String> {
        self.notices().into_iter().filter_map(|n| match n {
            Notice::Stale(id, _) => Some(id),
            _ => None,
        }).collect()
    }

    pub(crate) fn recoveries(&self) -> Vec<String> {
        self.notices().into_iter().filter_map(|n| match n {
            Notice::Recovery(id) => Some(id),
            _ => None,
        }).collect()
    }

    pub(crate) fn errors(&self) -> Vec<(String, String)> {
        self.notices().into_iter().filter_map(|n| match n {
            Notice::Error(id, message) => Some((id, message)),
            _ => None,
        }).collect()
    }

    pub(crate) fn finished_tasks(&self) -> Vec<ProgressTask> {
        self.notices().into_iter().filter_map(|n| match n {
            Notice::TaskFinished(task) => Some(task),
            _ => None,
        }).collect()
    }

    fn push(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_status_change(&self, service_id: &str, old: ServiceStatus, new: ServiceStatus) -> anyhow::Result<()> {
        self.push(Notice::StatusChange(service_id.to_string(), old, new));
        Ok(())
    }

    async fn notify_error(&self, service_id: &str, message: &str) -> anyhow::Result<()> {
        self.push(Notice::Error(service_id.to_string(), message.to_string()));
        Ok(())
    }

    async fn notify_stale_service(&self, service_id: &str, last_heartbeat_at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        self.push(Notice::Stale(service_id.to_string(), last_heartbeat_at));
        Ok(())
    }

    async fn notify_service_recovery(&self, service_id: &str) -> anyhow::Result<()> {
        self.push(Notice::Recovery(service_id.to_string()));
        Ok(())
    }

    async fn notify_task_finished(&self, task: &ProgressTask) -> anyhow::Result<()> {
        self.push(Notice::TaskFinished(task.clone()));
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify_status_change(&self, _service_id: &str, _old: ServiceStatus, _new: ServiceStatus) -> anyhow::Result<()> {
        anyhow::bail!("webhook rejected the payload")
    }

    async fn notify_error(&self, _service_id: &str, _message: &str) -> anyhow::Result<()> {
        anyhow::bail!("webhook rejected the payload")
    }

    async fn notify_stale_service(&self, _service_id: &str, _last_heartbeat_at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        anyhow::bail!("webhook rejected the payload")
    }

    async fn notify_service_recovery(&self, _service_id: &str) -> anyhow::Result<()> {
        anyhow::bail!("webhook rejected the payload")
    }
}

/// Never answers within any reasonable timeout.
#[derive(Debug)]
pub(crate) struct HangingNotifier;

impl HangingNotifier {
    async fn hang() -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[async_trait]
impl Notifier for HangingNotifier {
    async fn notify_status_change(&self, _service_id: &str, _old: ServiceStatus, _new: ServiceStatus) -> anyhow::Result<()> {
        Self::hang().await
    }

    async fn notify_error(&self, _service_id: &str, _message: &str) -> anyhow::Result<()> {
        Self::hang().await
    }

    async fn notify_stale_service(&self, _service_id: &str, _last_heartbeat_at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        Self::hang().await
    }

    async fn notify_service_recovery(&self, _service_id: &str) -> anyhow::Result<()> {
        Self::hang().await
    }
}

#[derive(Debug)]
pub(crate) struct PanickingNotifier;

#[async_trait]
impl Notifier for PanickingNotifier {
    async fn notify_status_change(&self, service_id: &str, _old: ServiceStatus, _new: ServiceStatus) -> anyhow::Result<()> {
        panic!("notifier bug while handling {}", service_id)
    }

    async fn notify_error(&self, service_id: &str, _message: &str) -> anyhow::Result<()> {
        panic!("notifier bug while handling {}", service_id)
    }

    async fn notify_stale_service(&self, service_id: &str, _last_heartbeat_at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        panic!("notifier bug while handling {}", service_id)
    }

    async fn notify_service_recovery(&self, service_id: &str) -> anyhow::Result<()> {
        panic!("notifier bug while handling {}", service_id)
    }
}

#[derive(Debug)]
pub(crate) struct FailingStorage;

#[async_trait]
impl StorageAdapter for FailingStorage {
    async fn initialize(&self) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn close(&self) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn store_heartbeat(&self, _service_id: &str, _event: &HeartbeatEvent) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn register_service(&self, _registration: &ServiceRegistration) -> anyhow::Result<String> {
        anyhow::bail!("connection refused")
    }

    async fn get_service_status(&self, _service_id: &str) -> anyhow::Result<Option<ServiceRecord>> {
        anyhow::bail!("connection refused")
    }

    async fn get_all_services(&self) -> anyhow::Result<Vec<ServiceRecord>> {
        anyhow::bail!("connection refused")
    }

    async fn get_service_heartbeats(&self, _service_id: &str, _limit: usize) -> anyhow::Result<Vec<HeartbeatEvent>> {
        anyhow::bail!("connection refused")
    }

    async fn delete_service(&self, _service_id: &str) -> anyhow::Result<bool> {
        anyhow::bail!("connection refused")
    }

    async fn store_error(&self, _error: &ErrorEvent) -> anyhow::Result<()> {
        anyhow::bail!("connection refused")
    }

    async fn get_errors(&self, _service_id: Option<&str>, _limit: usize, _skip: usize) -> anyhow::Result<Vec<ErrorEvent>> {
        anyhow::bail!("connection refused")
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
}
