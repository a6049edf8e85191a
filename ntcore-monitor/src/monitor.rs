//! Monitoring client bound to one workspace.

use chrono::{DateTime, Utc};
use ntcore_core::api::{ApiClient, ApiResponse, HttpApiClient, Payload};
use ntcore_core::client::build_url;
use ntcore_core::config::{SdkConfig, load_config};
use ntcore_core::error::ConfigError;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

/// Environment variable naming the DSP endpoint of a deployed model. Takes
/// precedence over the configured server.
pub const ENDPOINT_ENV: &str = "DSP_API_ENDPOINT";

/// Server address from [`ENDPOINT_ENV`]. A bare `host:port` is read as HTTP.
pub fn endpoint_override() -> Option<String> {
    let endpoint = std::env::var(ENDPOINT_ENV).ok()?;
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return None;
    }
    if endpoint.contains("://") {
        Some(endpoint.to_string())
    } else {
        Some(format!("http://{endpoint}"))
    }
}

/// Sends custom metrics, ground truth and log lines for a deployed model.
#[derive(Clone)]
pub struct Monitor {
    api: Arc<dyn ApiClient>,
    workspace_id: String,
}

impl Monitor {
    pub fn new(api: Arc<dyn ApiClient>, workspace_id: impl Into<String>) -> Self {
        Self {
            api,
            workspace_id: workspace_id.into(),
        }
    }

    /// Monitor for `monitor.workspace_id` of `config`, talking to
    /// [`ENDPOINT_ENV`] when set and to the configured server otherwise.
    pub fn from_config(config: &SdkConfig) -> Result<Self> {
        let workspace_id = config
            .monitor
            .workspace_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingWorkspace)?
            .to_string();

        let mut config = config.clone();
        if let Some(server) = endpoint_override() {
            debug!(server = %server, "Using monitoring endpoint from environment");
            config.server = server;
        }
        let api = HttpApiClient::new(&config)?;
        Ok(Self::new(Arc::new(api), workspace_id))
    }

    /// Monitor configured from config files and `NTCORE_` environment
    /// variables.
    pub fn from_env(workspace: Option<&Path>) -> Result<Self> {
        let config = load_config(workspace, None)?;
        Self::from_config(&config)
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Record one sample of a named metric.
    pub fn add_metric(&self, name: &str, value: f64) -> Result<ApiResponse> {
        let payload = Payload::form()
            .field("workspace_id", self.workspace_id.as_str())
            .field("name", name)
            .field("value", value.to_string());
        debug!(workspace_id = %self.workspace_id, name, value, "Adding metric");
        Ok(self
            .api
            .do_post(&build_url(&["monitoring", "metrics"]), &payload)?)
    }

    /// Report the true outcome for a past prediction input. `timestamp`
    /// defaults to now.
    pub fn upload_ground_truth(
        &self,
        input: &Value,
        ground_truth: &Value,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<ApiResponse> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let payload = Payload::form()
            .field("workspace_id", self.workspace_id.as_str())
            .field("inputData", serde_json::to_string(input)?)
            .field("groundTruth", plain_text(ground_truth))
            .field("timestamp", timestamp.timestamp_millis().to_string());
        Ok(self
            .api
            .do_post(&build_url(&["monitoring", "performances"]), &payload)?)
    }

    /// Ship one log line for the deployment.
    pub fn log(&self, message: &str) -> Result<ApiResponse> {
        let payload = Payload::form()
            .field("workspace_id", self.workspace_id.as_str())
            .field("message", message)
            .field("timestamp", Utc::now().timestamp_millis().to_string());
        Ok(self
            .api
            .do_post(&build_url(&["monitoring", "logs"]), &payload)?)
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("workspace_id", &self.workspace_id)
            .finish_non_exhaustive()
    }
}

/// Strings are sent without JSON quoting.
fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
