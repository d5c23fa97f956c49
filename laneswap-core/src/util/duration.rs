use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Human-friendly duration for configuration files: `{ minutes = 1, seconds = 30 }`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    milliseconds: Option<u64>,
}

impl ConfigDuration {
    pub fn to_std_duration(&self) -> Duration {
        let hours = self.hours.unwrap_or(0);
        let minutes = self.minutes.unwrap_or(0);
        let seconds = self.seconds.unwrap_or(0);
        let milliseconds = self.milliseconds.unwrap_or(0);
        Duration::from_secs(hours * 60 * 60 + minutes * 60 + seconds) + Duration::from_millis(milliseconds)
    }

    pub fn is_zero(&self) -> bool {
        self.to_std_duration().is_zero()
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            milliseconds: Some(millis),
            ..Default::default()
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self {
            seconds: Some(secs),
            ..Default::default()
        }
    }

    pub fn from_mins(mins: u64) -> Self {
        Self {
            minutes: Some(mins),
            ..Default::default()
        }
    }
}

impl From<Duration> for ConfigDuration {
    fn from(value: Duration) -> Self {
        let millis = value.as_millis() as u64;
        if millis % 1000 == 0 {
            ConfigDuration::from_secs(millis / 1000)
        } else {
            ConfigDuration::from_millis(millis)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::util::duration::ConfigDuration;

    #[test]
    fn test_to_std_duration() {
        let duration: ConfigDuration = toml::from_str("minutes = 1\nseconds = 30\nmilliseconds = 250").unwrap();
        assert_eq!(duration.to_std_duration(), Duration::from_millis(90_250));
        assert!(ConfigDuration::default().is_zero());
        assert_eq!(ConfigDuration::from(Duration::from_secs(5)), ConfigDuration::from_secs(5));
        assert_eq!(ConfigDuration::from(Duration::from_millis(1500)).to_std_duration(), Duration::from_millis(1500));
    }
}
