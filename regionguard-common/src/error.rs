use thiserror::Error;

/// Main error type for RegionGuard infrastructure concerns
#[derive(Error, Debug)]
pub enum RegionGuardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid region configuration: {0}")]
    InvalidRegion(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<config::ConfigError> for RegionGuardError {
    fn from(error: config::ConfigError) -> Self {
        RegionGuardError::Config(error.to_string())
    }
}

impl From<serde_json::Error> for RegionGuardError {
    fn from(error: serde_json::Error) -> Self {
        RegionGuardError::Serialization(error.to_string())
    }
}

impl From<prometheus::Error> for RegionGuardError {
    fn from(error: prometheus::Error) -> Self {
        RegionGuardError::Metrics(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RegionGuardError>;
