use config::builder::DefaultState;
use config::{Environment, File, FileFormat, Source};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::duration::ConfigDuration;
use crate::LANESWAP_CONFIG;

pub mod settings;

pub const ENV_PREFIX: &str = "LANESWAP";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneswapConfig {
    pub heartbeat: HeartbeatConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub check_interval: ConfigDuration,
    pub stale_threshold: ConfigDuration,
    pub history_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub notifier_timeout: ConfigDuration,
    pub storage_timeout: ConfigDuration,
}

impl Default for LaneswapConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig {
                check_interval: ConfigDuration::from_secs(30),
                stale_threshold: ConfigDuration::from_secs(60),
                history_limit: 100,
            },
            dispatch: DispatchConfig {
                notifier_timeout: ConfigDuration::from_secs(5),
                storage_timeout: ConfigDuration::from_secs(5),
            },
        }
    }
}

impl LaneswapConfig {
    pub fn builder() -> LaneswapConfigBuilder {
        LaneswapConfigBuilder::default()
    }

    /// Embedded defaults, then `path` if given, then `LANESWAP__*` environment variables.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = Self::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        builder.with_env().build()
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("heartbeat.check_interval", &self.heartbeat.check_interval),
            ("heartbeat.stale_threshold", &self.heartbeat.stale_threshold),
            ("dispatch.notifier_timeout", &self.dispatch.notifier_timeout),
            ("dispatch.storage_timeout", &self.dispatch.storage_timeout),
        ];
        for (name, duration) in positive {
            if duration.is_zero() {
                return Err(Error::Config(format!("{} must be a positive duration", name)));
            }
        }
        if self.heartbeat.history_limit == 0 {
            return Err(Error::Config("heartbeat.history_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LaneswapConfigBuilder {
    builder: config::ConfigBuilder<DefaultState>,
}

impl Default for LaneswapConfigBuilder {
    fn default() -> Self {
        let builder = config::Config::builder().add_source(File::from_str(LANESWAP_CONFIG, FileFormat::Toml));
        Self { builder }
    }
}

impl LaneswapConfigBuilder {
    pub fn add_source<T>(self, source: T) -> Self where T: Source + Send + Sync + 'static {
        Self { builder: self.builder.add_source(source) }
    }

    pub fn with_env(self) -> Self {
        let env = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);
        self.add_source(env)
    }

    pub fn build(self) -> anyhow::Result<LaneswapConfig> {
        let config = self.builder.build()?.try_deserialize::<LaneswapConfig>()?;
        config.validate()?;
        Ok(config)
    }
}
