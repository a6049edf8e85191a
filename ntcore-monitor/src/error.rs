//! Error types for the monitoring client.

use ntcore_core::error::{ApiError, ConfigError};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Failed to sample system metrics: {0}")]
    Sampler(#[from] std::io::Error),

    #[error("Malformed {source_name} data: {message}")]
    Parse {
        source_name: &'static str,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MonitorError {
    pub(crate) fn parse(source_name: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            source_name,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
