use thiserror::Error;

use crate::roster::dates::parse_clock;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Accepts the same `HH:MM` / `HH.MM` literals the scheduler resolves.
pub(crate) fn is_clock_time(value: &str) -> bool {
    parse_clock(value).is_some()
}
