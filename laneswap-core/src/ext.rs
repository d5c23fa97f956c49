use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

const MAX_ID_LEN: usize = 128;

pub fn init_logger(level: tracing::Level) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .with_target(true);
    let _ = tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_max_level(level)
        .try_init();
}

pub fn init_logger_with_filter(filter: impl Into<EnvFilter>) {
    let format = tracing_subscriber::fmt::format()
        .with_timer(LocalTime::rfc_3339())
        .with_file(false);
    let _ = tracing_subscriber::FmtSubscriber::builder()
        .event_format(format)
        .with_env_filter(filter)
        .try_init();
}

pub(crate) fn random_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn check_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(Error::Validation(format!("id must be 1..={} bytes long", MAX_ID_LEN)));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::Validation(format!("id {:?} contains whitespace or control characters", id)));
    }
    Ok(())
}
