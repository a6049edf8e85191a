//! The SDK client: run lifecycle, emission and workspace management.

use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::{ApiClient, ApiResponse, HttpApiClient, Payload};
use crate::config::{SdkConfig, load_config};
use crate::error::{ApiError, ConfigError, NtcoreError, Result};
use crate::experiment::Experiment;
use crate::serializer::select_serializer;

/// Join path segments with `/`, trimming surrounding slashes from each.
pub fn build_url(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

struct ClientInner {
    api: Arc<dyn ApiClient>,
    active_runs: Mutex<HashSet<Uuid>>,
}

/// Entry point of the SDK. Cheap to clone; clones share the API client and
/// the set of active runs.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Client talking HTTP to the server named in `config`.
    pub fn new(config: &SdkConfig) -> Result<Self> {
        let api = HttpApiClient::new(config)?;
        Ok(Self::with_api_client(Arc::new(api)))
    }

    /// Client configured from config files and `NTCORE_` environment variables.
    pub fn from_env(workspace: Option<&Path>) -> Result<Self> {
        let config = load_config(workspace, None)?;
        Self::new(&config)
    }

    pub fn with_api_client(api: Arc<dyn ApiClient>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                api,
                active_runs: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn api(&self) -> &Arc<dyn ApiClient> {
        &self.inner.api
    }

    /// Open a run bound to `workspace_id`. The run stays active until it is
    /// saved or dropped.
    pub fn start_run(&self, workspace_id: impl Into<String>) -> Experiment {
        let run = Experiment::new(self.clone(), workspace_id.into());
        self.runs().insert(run.id());
        debug!(run_id = %run.id(), workspace_id = run.workspace_id(), "Run started");
        run
    }

    /// Remove a run from the active set. Removing an inactive run is a no-op.
    pub fn stop_run(&self, run: &Experiment) {
        self.release(run.id());
    }

    pub fn active_runs(&self) -> usize {
        self.runs().len()
    }

    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.runs().contains(&run_id)
    }

    /// Serialize and upload a run. The run leaves the active set once the
    /// upload succeeded.
    pub fn save(&self, run: &Experiment) -> Result<ApiResponse> {
        let workspace_id = run.workspace_id().trim();
        if workspace_id.is_empty() {
            return Err(ConfigError::MissingWorkspace.into());
        }
        let model = run
            .serializable_model()
            .ok_or(ConfigError::MissingModel)?;

        let mut serializer = select_serializer(model, run.framework())?;
        let bytes = serializer.serialize(model)?;
        let runtime = run
            .runtime()
            .map(str::to_string)
            .unwrap_or_else(crate::runtime_version);

        let payload = Payload::multipart()
            .field("runtime", runtime)
            .field("framework", serializer.framework().as_str())
            .field(
                "parameters",
                serde_json::to_string(run.pretraining_metadata())?,
            )
            .field("metrics", serde_json::to_string(run.posttraining_metadata())?)
            .file("model", bytes);

        let path = build_url(&[workspace_id, "experiment"]);
        info!(
            run_id = %run.id(),
            workspace_id,
            framework = %serializer.framework(),
            "Uploading experiment"
        );
        let response = self.inner.api.do_post(&path, &payload)?;
        self.release(run.id());
        serializer.close();
        Ok(response)
    }

    pub fn create_workspace(&self, name: &str) -> Result<Value> {
        let payload = Payload::Json(json!({ "type": "API", "name": name }));
        self.json(self.inner.api.do_post("workspace", &payload)?)
    }

    pub fn get_workspace(&self, workspace_id: &str) -> Result<Value> {
        let path = build_url(&["workspace", workspace_id]);
        self.json(self.inner.api.do_get(&path)?)
    }

    pub fn list_workspaces(&self) -> Result<Value> {
        self.json(self.inner.api.do_get("workspaces")?)
    }

    pub fn delete_workspace(&self, workspace_id: &str) -> Result<ApiResponse> {
        let path = build_url(&["workspace", workspace_id]);
        Ok(self.inner.api.do_delete(&path)?)
    }

    /// Mark experiment `version` as the registered model of the workspace.
    pub fn register_experiment(&self, workspace_id: &str, version: u64) -> Result<ApiResponse> {
        let path = build_url(&["workspace", workspace_id, "registry"]);
        let payload = Payload::form().field("version", version.to_string());
        Ok(self.inner.api.do_post(&path, &payload)?)
    }

    pub fn get_registered_experiment(&self, workspace_id: &str) -> Result<Value> {
        let path = build_url(&["workspace", workspace_id, "registry"]);
        self.json(self.inner.api.do_get(&path)?)
    }

    pub fn unregister_experiment(&self, workspace_id: &str) -> Result<ApiResponse> {
        let path = build_url(&["workspace", workspace_id, "registry"]);
        Ok(self.inner.api.do_delete(&path)?)
    }

    pub fn deploy_model(&self, workspace_id: &str) -> Result<Value> {
        let payload = Payload::form().field("workspaceId", workspace_id);
        self.json(self.inner.api.do_post("deployments", &payload)?)
    }

    /// Download a model to `path`. Version 0 selects the registered version.
    pub fn download_model(&self, path: &Path, workspace_id: &str, version: u64) -> Result<()> {
        let version = if version == 0 {
            let registered = self.get_registered_experiment(workspace_id)?;
            registered
                .get("version")
                .and_then(Value::as_u64)
                .ok_or_else(|| ApiError::GarbageResponse {
                    message: "registered experiment has no version".into(),
                })?
        } else {
            version
        };

        let url = build_url(&[workspace_id, "models", &version.to_string()]);
        let bytes = match self.inner.api.do_get(&url)? {
            ApiResponse::Bytes(bytes) => bytes,
            ApiResponse::Json(value) => serde_json::to_vec(&value)?,
            ApiResponse::Empty => Vec::new(),
        };
        std::fs::write(path, bytes)?;
        info!(workspace_id, version, path = %path.display(), "Model downloaded");
        Ok(())
    }

    fn json(&self, response: ApiResponse) -> Result<Value> {
        match response {
            ApiResponse::Json(value) => Ok(value),
            ApiResponse::Empty => Ok(Value::Null),
            ApiResponse::Bytes(_) => Err(NtcoreError::Api(ApiError::GarbageResponse {
                message: "expected a JSON response".into(),
            })),
        }
    }

    fn runs(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        self.inner
            .active_runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, run_id: Uuid) {
        if self.runs().remove(&run_id) {
            debug!(run_id = %run_id, "Run released");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("active_runs", &self.active_runs())
            .finish()
    }
}
