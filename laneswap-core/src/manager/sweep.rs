use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::{HeartbeatManager, Inner};
use crate::metadata::{Metadata, KEY_SOURCE};
use crate::record::HeartbeatEvent;
use crate::status::ServiceStatus;

const SWEEP_SOURCE: &str = "sweep";

#[derive(Debug)]
pub(crate) struct SweepTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct StaleService {
    id: String,
    previous: ServiceStatus,
    last_heartbeat_at: Option<DateTime<Utc>>,
    event: HeartbeatEvent,
}

impl HeartbeatManager {
    /// Initializes the storage adapters and starts the periodic staleness
    /// sweep. Calling it on a running manager only logs a warning.
    pub async fn start(&self) {
        let mut sweeper = self.inner.sweeper.lock().await;
        if sweeper.is_some() {
            warn!("heartbeat sweep already running");
            return;
        }
        self.inner.dispatcher.each_storage("initialize", |storage| async move {
            storage.initialize().await
        }).await;
        let token = CancellationToken::new();
        let interval = self.inner.settings.check_interval;
        let handle = tokio::spawn(sweep_loop(Arc::downgrade(&self.inner), token.clone(), interval));
        info!("heartbeat sweep started, check interval {:?}, stale threshold {:?}", interval, self.inner.settings.stale_threshold);
        *sweeper = Some(SweepTask { token, handle });
    }

    /// Stops the sweep, abandons the deliveries of an in-flight pass and closes
    /// the storage adapters. Stopping a manager that is not running does nothing.
    pub async fn stop(&self) {
        let task = self.inner.sweeper.lock().await.take();
        let Some(SweepTask { token, handle }) = task else {
            debug!("heartbeat sweep not running");
            return;
        };
        token.cancel();
        if let Err(error) = handle.await {
            warn!("heartbeat sweep task ended abnormally: {}", error);
        }
        self.inner.dispatcher.each_storage("close", |storage| async move {
            storage.close().await
        }).await;
        info!("heartbeat sweep stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.sweeper.lock().await.is_some()
    }

    /// Runs one staleness pass now and returns the services it marked stale.
    pub async fn run_sweep(&self) -> Vec<String> {
        self.run_sweep_at(Utc::now()).await
    }

    /// Marks every service whose last sign of life is older than the stale
    /// threshold, measured from `now`. Services already stale are skipped so
    /// each stale episode is notified once.
    pub async fn run_sweep_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let threshold = self.inner.stale_threshold;
        let stale = {
            let mut registry = self.inner.registry.lock();
            registry
                .values_mut()
                .filter(|record| !record.status.is_stale() && now - record.last_seen() > threshold)
                .map(|record| {
                    let previous = record.status;
                    let message = format!("no heartbeat received within {:?}", self.inner.settings.stale_threshold);
                    let mut metadata = Metadata::new();
                    metadata.insert(KEY_SOURCE.to_string(), Value::String(SWEEP_SOURCE.to_string()));
                    let event = HeartbeatEvent::new(ServiceStatus::Stale, Some(message.clone()), metadata, now);
                    record.status = ServiceStatus::Stale;
                    record.last_message = Some(message);
                    record.push_history(event.clone(), self.inner.settings.history_limit);
                    StaleService {
                        id: record.id.clone(),
                        previous,
                        last_heartbeat_at: record.last_heartbeat_at,
                        event,
                    }
                })
                .collect::<Vec<_>>()
        };
        let marked = stale.iter().map(|service| service.id.clone()).collect();
        let deliveries = stale.into_iter().map(|service| async move {
            warn!("service {} is stale, last heartbeat {:?}", service.id, service.last_heartbeat_at);
            self.persist_event(&service.id, service.event).await;
            self.notify_transition(&service.id, service.previous, ServiceStatus::Stale, None).await;
            let id = service.id;
            let last_heartbeat_at = service.last_heartbeat_at;
            self.inner.dispatcher.each_notifier("notify stale service", |notifier| {
                let id = id.clone();
                async move { notifier.notify_stale_service(&id, last_heartbeat_at).await }
            }).await;
        });
        join_all(deliveries).await;
        marked
    }
}

async fn sweep_loop(inner: Weak<Inner>, token: CancellationToken, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    debug!("heartbeat manager dropped, sweep exits");
                    break;
                };
                let manager = HeartbeatManager { inner };
                // registry transitions happen before the first await, cancelling only drops deliveries
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("sweep pass cancelled");
                        break;
                    }
                    stale = manager.run_sweep() => {
                        if !stale.is_empty() {
                            debug!("sweep marked {} service(s) stale", stale.len());
                        }
                    }
                }
            }
        }
    }
}
