use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Parser;
use futures::future::join_all;
use rand::Rng;
use serde_json::json;
use tracing::info;

use laneswap_core::config::LaneswapConfig;
use laneswap_core::ext::init_logger_with_filter;
use laneswap_core::notifier::log::LogNotifier;
use laneswap_core::storage::memory::MemoryStorage;
use laneswap_core::{HeartbeatManager, ManagerSettings, Notifier, ProgressManager, ProgressStatus, ServiceStatus};

#[derive(Parser, Debug)]
struct Args {
    /// Optional config file layered over the embedded defaults.
    #[arg(short, long)]
    config: Option<String>,
    #[arg(short, long, default_value_t = 4)]
    services: usize,
    #[arg(long, default_value_t = 500)]
    check_interval_ms: u64,
    #[arg(long, default_value_t = 1500)]
    stale_threshold_ms: u64,
    #[arg(short, long, default_value_t = 6)]
    duration_secs: u64,
}

#[derive(Debug, Default)]
struct CountingNotifier {
    transitions: AtomicUsize,
    stale: AtomicUsize,
    recoveries: AtomicUsize,
}

#[async_trait]
impl Notifier for CountingNotifier {
    fn name(&self) -> &str {
        "counting"
    }

    async fn notify_status_change(&self, _service_id: &str, _old: ServiceStatus, _new: ServiceStatus) -> anyhow::Result<()> {
        self.transitions.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn notify_error(&self, _service_id: &str, _message: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn notify_stale_service(&self, _service_id: &str, _last_heartbeat_at: Option<DateTime<Utc>>) -> anyhow::Result<()> {
        self.stale.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn notify_service_recovery(&self, _service_id: &str) -> anyhow::Result<()> {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

async fn worker(manager: HeartbeatManager, id: String, run_for: Duration, pause: Option<Duration>) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + run_for;
    let mut paused = false;
    while tokio::time::Instant::now() < deadline {
        let (status, delay) = {
            let mut rng = rand::thread_rng();
            let status = match rng.gen_range(0..10) {
                0 => ServiceStatus::Warning,
                1 | 2 => ServiceStatus::Busy,
                _ => ServiceStatus::Healthy,
            };
            (status, Duration::from_millis(rng.gen_range(100..400)))
        };
        let metadata = json!({"queue": delay.as_millis() as u64 / 10}).as_object().cloned();
        manager.heartbeat(&id, status, None, metadata).await?;
        if let (Some(pause), false) = (pause, paused) {
            info!("{} goes silent for {:?}", id, pause);
            tokio::time::sleep(pause).await;
            paused = true;
        }
        tokio::time::sleep(delay).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger_with_filter("laneswap_core=info,laneswap=info,monitor=info");
    let config = LaneswapConfig::load(args.config.as_deref())?;
    let mut settings = ManagerSettings::from(&config);
    settings.check_interval = Duration::from_millis(args.check_interval_ms);
    settings.stale_threshold = Duration::from_millis(args.stale_threshold_ms);
    let manager = HeartbeatManager::new(settings)?;
    let counting = Arc::new(CountingNotifier::default());
    manager.add_storage(Arc::new(MemoryStorage::new())).await;
    manager.add_notifier(Arc::new(LogNotifier::default()));
    manager.add_notifier(counting.clone());
    manager.start().await;

    let run_for = Duration::from_secs(args.duration_secs);
    let mut ids = Vec::with_capacity(args.services);
    for i in 0..args.services {
        let metadata = json!({"version": "1.0.0", "replica": i}).as_object().cloned();
        ids.push(manager.register(format!("worker-{}", i), None, metadata).await?);
    }

    let progress = ProgressManager::new(&manager);
    let batch = ids.first().cloned();
    let batch_job = async {
        let Some(service_id) = batch else {
            return anyhow::Ok(());
        };
        let task_id = progress.start_progress(&service_id, "nightly import", 20, None).await?;
        let scope = manager.instrument(&service_id);
        let result = scope.run(async {
            for step in 1..=20 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                progress.update_progress(&task_id, step, None, None).await?;
            }
            anyhow::Ok(())
        }).await;
        let status = if result.is_ok() { ProgressStatus::Completed } else { ProgressStatus::Failed };
        let task = progress.complete_progress(&task_id, status, None).await?;
        info!("task {} finished at {:.0}%", task.name, task.percent_complete());
        Ok(())
    };

    let silence = Duration::from_millis(args.stale_threshold_ms * 2);
    let workers = ids.iter().enumerate().map(|(i, id)| {
        let pause = (i == ids.len() - 1).then_some(silence);
        tokio::spawn(worker(manager.clone(), id.clone(), run_for, pause))
    });
    let (results, batch_result) = futures::join!(join_all(workers), batch_job);
    batch_result?;
    for result in results {
        result??;
    }

    let summary = manager.summary();
    info!("{} services tracked", summary.total);
    for (status, count) in &summary.status_counts {
        info!("  {:<8} {}", status.as_str(), count);
    }
    for record in manager.list(None) {
        info!("  {} {} {}", record.id, record.name, record.status);
    }
    info!(
        "{} transitions, {} stale, {} recoveries, {} errors logged",
        counting.transitions.load(Ordering::Relaxed),
        counting.stale.load(Ordering::Relaxed),
        counting.recoveries.load(Ordering::Relaxed),
        manager.recent_errors(None, 100).await.len(),
    );
    manager.stop().await;
    Ok(())
}
