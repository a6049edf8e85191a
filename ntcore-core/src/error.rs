//! Error types for the NTCore SDK core.
//!
//! Uses `thiserror` for public API error types. Configuration and transport
//! failures surface to the caller of `save()`; metric and capture failures are
//! degrade-gracefully paths and only ever reach the logs.

use std::path::PathBuf;

/// Top-level error type for the SDK core.
#[derive(Debug, thiserror::Error)]
pub enum NtcoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] SerializeError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NtcoreError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }
}

/// Misconfigured runs and clients. Raised synchronously from `save()`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Workspace id is required")]
    MissingWorkspace,

    #[error("Serializable model is not provided")]
    MissingModel,

    #[error("Unknown framework: {name}")]
    UnknownFramework { name: String },

    #[error("Invalid server URL {url}: {message}")]
    InvalidServer { url: String, message: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Errors surfaced by the API client boundary.
///
/// Raw transport errors never leak out of the client; they are folded into
/// one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Connection to {server} failed: {message}")]
    Communication { server: String, message: String },

    #[error("Invalid response: {message}")]
    GarbageResponse { message: String },

    #[error("Server returned errors: {body}")]
    Server { body: serde_json::Value },

    #[error("Request to {path} failed with status {status}")]
    Status { path: String, status: u16 },

    #[error("Invalid request path {path}: {message}")]
    InvalidPath { path: String, message: String },
}

/// Errors produced while turning a model into bytes.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("Unable to determine model framework")]
    UnknownFramework,

    #[error("{framework} model path is invalid: {path} ({expected})")]
    InvalidPath {
        framework: &'static str,
        path: PathBuf,
        expected: &'static str,
    },

    #[error("Model export failed: {0}")]
    Export(String),

    #[error("Archive error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Estimator dump failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by a framework's own training/saving entry point.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid argument `{name}`: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("Missing argument `{name}`")]
    MissingArgument { name: String },

    #[error("Method `{method}` is not supported by {model}")]
    Unsupported { model: String, method: String },

    #[error("Model is not fitted")]
    NotFitted,

    #[error("{0}")]
    Other(String),
}

impl ModelError {
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// A single metric that could not be computed. The metric is omitted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    #[error("Length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    #[error("Empty input")]
    Empty,

    #[error("{0}")]
    Undefined(String),

    #[error("Prediction failed: {0}")]
    Prediction(#[from] ModelError),
}

impl MetricError {
    pub fn undefined(msg: impl Into<String>) -> Self {
        Self::Undefined(msg.into())
    }
}

pub type Result<T, E = NtcoreError> = std::result::Result<T, E>;
