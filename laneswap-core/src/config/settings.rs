use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::config::LaneswapConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct ManagerSettings {
    #[builder(default = Duration::from_secs(30))]
    pub check_interval: Duration,
    #[builder(default = Duration::from_secs(60))]
    pub stale_threshold: Duration,
    #[builder(default = 100)]
    pub history_limit: usize,
    #[builder(default = Duration::from_secs(5))]
    pub notifier_timeout: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub storage_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        ManagerSettings::builder().build()
    }
}

impl ManagerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(Error::Config("check_interval must be positive".to_string()));
        }
        if self.stale_threshold.is_zero() {
            return Err(Error::Config("stale_threshold must be positive".to_string()));
        }
        if self.notifier_timeout.is_zero() || self.storage_timeout.is_zero() {
            return Err(Error::Config("collaborator timeouts must be positive".to_string()));
        }
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl From<&LaneswapConfig> for ManagerSettings {
    fn from(config: &LaneswapConfig) -> Self {
        ManagerSettings {
            check_interval: config.heartbeat.check_interval.to_std_duration(),
            stale_threshold: config.heartbeat.stale_threshold.to_std_duration(),
            history_limit: config.heartbeat.history_limit,
            notifier_timeout: config.dispatch.notifier_timeout.to_std_duration(),
            storage_timeout: config.dispatch.storage_timeout.to_std_duration(),
        }
    }
}
