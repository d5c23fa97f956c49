use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ext::random_id;
use crate::manager::HeartbeatManager;
use crate::metadata::{self, Metadata};
use crate::progress::task::ProgressTask;
use crate::record::ErrorEvent;
use crate::status::ProgressStatus;

pub mod task;

/// Tracks long-running tasks owned by registered services.
///
/// Tasks move `pending -> running -> completed | failed`; once terminal a task
/// is frozen. Tasks live in the [`HeartbeatManager`] they were created through,
/// are dropped with their service, and use the same collaborators.
#[derive(Debug, Clone)]
pub struct ProgressManager {
    manager: HeartbeatManager,
}

impl ProgressManager {
    pub fn new(manager: &HeartbeatManager) -> Self {
        Self {
            manager: manager.clone(),
        }
    }

    fn tasks(&self) -> &DashMap<String, ProgressTask> {
        &self.manager.inner.tasks
    }

    pub async fn start_progress(
        &self,
        service_id: &str,
        name: impl Into<String>,
        total_steps: u64,
        metadata: Option<Metadata>,
    ) -> Result<String> {
        if total_steps == 0 {
            return Err(Error::Validation("total_steps must be at least 1".to_string()));
        }
        if !self.manager.contains(service_id) {
            return Err(Error::ServiceNotFound(service_id.to_string()));
        }
        let metadata = metadata.unwrap_or_default();
        metadata::validate(&metadata)?;
        let now = Utc::now();
        let task = ProgressTask {
            id: random_id(),
            service_id: service_id.to_string(),
            name: name.into(),
            total_steps,
            current_step: 0,
            status: ProgressStatus::Pending,
            created_at: now,
            updated_at: now,
            message: None,
            metadata,
        };
        let id = task.id.clone();
        info!("service {} started task {} ({}, {} steps)", service_id, id, task.name, total_steps);
        self.tasks().insert(id.clone(), task.clone());
        self.persist(task).await;
        Ok(id)
    }

    /// Moves the step counter, clamped into `0..=total_steps`. The first
    /// update moves a pending task to running.
    pub async fn update_progress(
        &self,
        task_id: &str,
        current_step: i64,
        message: Option<String>,
        metadata: Option<Metadata>,
    ) -> Result<ProgressTask> {
        if let Some(metadata) = &metadata {
            metadata::validate(metadata)?;
        }
        let snapshot = {
            let mut task = self.tasks()
                .get_mut(task_id)
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            if !self.manager.contains(&task.service_id) {
                return Err(Error::ServiceNotFound(task.service_id.clone()));
            }
            if task.is_finalized() {
                return Err(Error::TaskFinalized { id: task_id.to_string(), status: task.status });
            }
            task.current_step = task.clamp_step(current_step);
            task.status = ProgressStatus::Running;
            if message.is_some() {
                task.message = message;
            }
            if let Some(metadata) = &metadata {
                metadata::merge(&mut task.metadata, metadata);
            }
            task.updated_at = Utc::now();
            task.clone()
        };
        debug!("task {} at {}/{}", task_id, snapshot.current_step, snapshot.total_steps);
        self.persist(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// Finalizes a task as completed or failed. A failed task is also written
    /// to the error log and reported through the error hook.
    pub async fn complete_progress(
        &self,
        task_id: &str,
        status: ProgressStatus,
        message: Option<String>,
    ) -> Result<ProgressTask> {
        if !status.is_terminal() {
            return Err(Error::Validation(format!("cannot complete task with status {}", status)));
        }
        let snapshot = {
            let mut task = self.tasks()
                .get_mut(task_id)
                .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
            if !self.manager.contains(&task.service_id) {
                return Err(Error::ServiceNotFound(task.service_id.clone()));
            }
            if task.is_finalized() {
                return Err(Error::TaskFinalized { id: task_id.to_string(), status: task.status });
            }
            task.status = status;
            if status == ProgressStatus::Completed {
                task.current_step = task.total_steps;
            }
            if message.is_some() {
                task.message = message;
            }
            task.updated_at = Utc::now();
            task.clone()
        };
        info!("task {} of service {} {}", task_id, snapshot.service_id, status);
        self.persist(snapshot.clone()).await;
        let dispatcher = &self.manager.inner.dispatcher;
        let finished = Arc::new(snapshot.clone());
        dispatcher.each_notifier("notify task finished", |notifier| {
            let task = finished.clone();
            async move { notifier.notify_task_finished(&task).await }
        }).await;
        if status == ProgressStatus::Failed {
            let reason = snapshot.message.clone().unwrap_or_else(|| format!("task {} failed", snapshot.name));
            let mut error_metadata = snapshot.metadata.clone();
            error_metadata.insert("task_id".to_string(), serde_json::Value::String(snapshot.id.clone()));
            warn!("task {} of service {} failed: {}", task_id, snapshot.service_id, reason);
            self.manager.store_error(ErrorEvent::new(&snapshot.service_id, reason.clone(), error_metadata)).await;
            let service_id = snapshot.service_id.clone();
            dispatcher.each_notifier("notify error", |notifier| {
                let service_id = service_id.clone();
                let reason = reason.clone();
                async move { notifier.notify_error(&service_id, &reason).await }
            }).await;
        }
        Ok(snapshot)
    }

    pub fn get_progress(&self, task_id: &str) -> Result<ProgressTask> {
        self.tasks()
            .get(task_id)
            .map(|task| task.value().clone())
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Oldest first, optionally restricted to one service.
    pub fn list_progress(&self, service_id: Option<&str>) -> Vec<ProgressTask> {
        self.tasks()
            .iter()
            .filter(|task| service_id.map_or(true, |id| task.service_id == id))
            .map(|task| task.value().clone())
            .sorted_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .collect()
    }

    async fn persist(&self, task: ProgressTask) {
        let task = Arc::new(task);
        self.manager.inner.dispatcher.each_storage("store progress", |storage| {
            let task = task.clone();
            async move { storage.store_progress(&task).await }
        }).await;
    }
}
