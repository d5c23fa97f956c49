pub const LANESWAP_CONFIG: &'static str = include_str!("../laneswap.toml");

pub mod config;
pub(crate) mod dispatch;
pub mod error;
pub mod ext;
pub mod instrument;
pub mod manager;
pub mod metadata;
pub mod notifier;
pub mod progress;
pub mod record;
pub mod status;
pub mod storage;
pub mod util;
#[cfg(test)]
pub(crate) mod testkit;

pub use config::settings::ManagerSettings;
pub use config::LaneswapConfig;
pub use error::{Error, Result};
pub use instrument::{HeartbeatGuard, InstrumentOptions, Instrumented};
pub use manager::HeartbeatManager;
pub use notifier::Notifier;
pub use progress::task::ProgressTask;
pub use progress::ProgressManager;
pub use record::{ErrorEvent, HeartbeatEvent, ServiceRecord, ServiceRegistration, StatusSummary};
pub use status::{ProgressStatus, ServiceStatus};
pub use storage::StorageAdapter;
