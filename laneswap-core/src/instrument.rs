use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use crate::manager::HeartbeatManager;
use crate::metadata::{Metadata, KEY_DURATION_MS, KEY_ERROR};
use crate::record::ErrorEvent;
use crate::status::ServiceStatus;

const DROPPED_SCOPE: &str = "instrumented scope dropped before completion";

#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct InstrumentOptions {
    #[builder(default = ServiceStatus::Busy)]
    pub start_status: ServiceStatus,
    #[builder(default = ServiceStatus::Healthy)]
    pub success_status: ServiceStatus,
    #[builder(default = ServiceStatus::Error)]
    pub error_status: ServiceStatus,
    #[builder(default, setter(strip_option, into))]
    pub start_message: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub success_message: Option<String>,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        InstrumentOptions::builder().build()
    }
}

/// Wraps units of work of one service with start, success and failure
/// heartbeats. Heartbeat problems are logged and never change the outcome of
/// the wrapped work.
#[derive(Debug, Clone)]
pub struct Instrumented {
    manager: HeartbeatManager,
    service_id: String,
    options: InstrumentOptions,
}

impl HeartbeatManager {
    pub fn instrument(&self, service_id: impl Into<String>) -> Instrumented {
        Instrumented {
            manager: self.clone(),
            service_id: service_id.into(),
            options: InstrumentOptions::default(),
        }
    }
}

impl Instrumented {
    pub fn with_options(mut self, options: InstrumentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Runs `work` between a start heartbeat and an outcome heartbeat and
    /// hands back its result untouched.
    pub async fn run<F, T, E>(&self, work: F) -> Result<T, E>
        where
            F: Future<Output=Result<T, E>>,
            E: Display,
    {
        let started = Instant::now();
        self.report_start().await;
        match work.await {
            Ok(value) => {
                self.report_success().await;
                Ok(value)
            }
            Err(error) => {
                self.report_failure(error.to_string(), started.elapsed()).await;
                Err(error)
            }
        }
    }

    /// Sends the start heartbeat and returns a guard for the outcome. A guard
    /// dropped without an outcome reports a failure.
    pub async fn enter(&self) -> HeartbeatGuard {
        self.report_start().await;
        HeartbeatGuard {
            scope: self.clone(),
            started: Instant::now(),
            finished: false,
        }
    }

    async fn report_start(&self) {
        let message = self.options.start_message.clone();
        self.beat(self.options.start_status, message, None).await;
    }

    async fn report_success(&self) {
        let message = self.options.success_message.clone();
        self.beat(self.options.success_status, message, None).await;
    }

    async fn report_failure(&self, reason: String, elapsed: Duration) {
        let mut metadata = Metadata::new();
        metadata.insert(KEY_ERROR.to_string(), Value::String(reason.clone()));
        metadata.insert(KEY_DURATION_MS.to_string(), Value::from(elapsed.as_millis() as u64));
        let status = self.options.error_status;
        let delivered = self.beat(status, Some(reason.clone()), Some(metadata.clone())).await;
        // error heartbeats already land in the error log
        if delivered && status != ServiceStatus::Error {
            self.manager.store_error(ErrorEvent::new(&self.service_id, reason, metadata)).await;
        }
    }

    async fn beat(&self, status: ServiceStatus, message: Option<String>, metadata: Option<Metadata>) -> bool {
        match self.manager.heartbeat(&self.service_id, status, message, metadata).await {
            Ok(_) => true,
            Err(error) => {
                warn!("instrumentation heartbeat {} for {} failed: {}", status, self.service_id, error);
                false
            }
        }
    }
}

pub struct HeartbeatGuard {
    scope: Instrumented,
    started: Instant,
    finished: bool,
}

impl Debug for HeartbeatGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatGuard")
            .field("service_id", &self.scope.service_id)
            .field("elapsed", &self.started.elapsed())
            .field("finished", &self.finished)
            .finish()
    }
}

impl HeartbeatGuard {
    pub async fn succeed(mut self) {
        self.finished = true;
        self.scope.report_success().await;
    }

    pub async fn fail(mut self, error: &dyn Display) {
        self.finished = true;
        self.scope.report_failure(error.to_string(), self.started.elapsed()).await;
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let scope = self.scope.clone();
        let elapsed = self.started.elapsed();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    scope.report_failure(DROPPED_SCOPE.to_string(), elapsed).await;
                });
            }
            Err(_) => {
                debug!("no runtime to report dropped scope of {}", scope.service_id);
            }
        }
    }
}
