//! Experiment runs.
//!
//! An [`Experiment`] accumulates the metadata and model artifact of one
//! training session and emits them once via [`Experiment::save`]. Dropping a
//! run always removes it from the owning client's active-run set. Dropping
//! without saving discards the run: nothing is sent.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::ApiResponse;
use crate::args::{Metrics, Params};
use crate::client::Client;
use crate::error::{ConfigError, Result};
use crate::framework::Framework;
use crate::serializer::SerializableModel;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Workspace bound, nothing recorded yet.
    Created,
    /// Metadata or model has been written at least once.
    Accumulating,
    /// Emitted to the server.
    Saved,
    /// Released without being saved.
    Discarded,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Saved | Self::Discarded)
    }
}

/// One logical training run bound to a workspace.
pub struct Experiment {
    id: Uuid,
    client: Client,
    workspace_id: String,
    runtime: Option<String>,
    framework: Framework,
    pretraining_metadata: Params,
    posttraining_metadata: Metrics,
    serializable_model: Option<SerializableModel>,
    status: RunStatus,
    emissions: usize,
}

impl Experiment {
    pub(crate) fn new(client: Client, workspace_id: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            client,
            workspace_id,
            runtime: None,
            framework: Framework::Unknown,
            pretraining_metadata: Params::new(),
            posttraining_metadata: Metrics::new(),
            serializable_model: None,
            status: RunStatus::Created,
            emissions: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Number of successful emissions of this run.
    pub fn emissions(&self) -> usize {
        self.emissions
    }

    pub fn runtime(&self) -> Option<&str> {
        self.runtime.as_deref()
    }

    pub fn set_runtime(&mut self, runtime: impl Into<String>) {
        self.runtime = Some(runtime.into());
        self.touch();
    }

    pub fn framework(&self) -> Framework {
        self.framework
    }

    pub fn set_framework(&mut self, framework: Framework) {
        self.framework = framework;
        self.touch();
    }

    pub fn pretraining_metadata(&self) -> &Params {
        &self.pretraining_metadata
    }

    /// Replace the hyperparameters and tags of this run.
    pub fn set_pretraining_metadata(&mut self, metadata: Params) {
        self.pretraining_metadata = metadata;
        self.touch();
    }

    /// Merge entries into the hyperparameters, overwriting existing keys.
    pub fn extend_pretraining_metadata(&mut self, metadata: Params) {
        self.pretraining_metadata.extend(metadata);
        self.touch();
    }

    pub fn posttraining_metadata(&self) -> &Metrics {
        &self.posttraining_metadata
    }

    /// Replace the computed metrics of this run.
    pub fn set_posttraining_metadata(&mut self, metrics: Metrics) {
        self.posttraining_metadata = metrics;
        self.touch();
    }

    pub fn extend_posttraining_metadata(&mut self, metrics: Metrics) {
        self.posttraining_metadata.extend(metrics);
        self.touch();
    }

    pub fn serializable_model(&self) -> Option<&SerializableModel> {
        self.serializable_model.as_ref()
    }

    pub fn set_serializable_model(&mut self, model: impl Into<SerializableModel>) {
        self.serializable_model = Some(model.into());
        self.touch();
    }

    /// Emit the run to the server.
    ///
    /// Fails when no model was set. Saving a run twice emits it twice.
    pub fn save(&mut self) -> Result<ApiResponse> {
        if self.serializable_model.is_none() {
            return Err(ConfigError::MissingModel.into());
        }
        if self.status == RunStatus::Saved {
            warn!(run_id = %self.id, "Run was already saved, emitting it again");
        }

        let client = self.client.clone();
        let response = client.save(self)?;
        self.status = RunStatus::Saved;
        self.emissions += 1;
        Ok(response)
    }

    /// Set the model, then [`save`](Self::save).
    pub fn save_model(&mut self, model: impl Into<SerializableModel>) -> Result<ApiResponse> {
        self.set_serializable_model(model);
        self.save()
    }

    fn touch(&mut self) {
        if self.status == RunStatus::Created {
            self.status = RunStatus::Accumulating;
        }
    }
}

impl Drop for Experiment {
    fn drop(&mut self) {
        self.client.stop_run(self);
        if self.status != RunStatus::Saved {
            self.status = RunStatus::Discarded;
            debug!(
                run_id = %self.id,
                workspace_id = %self.workspace_id,
                "Run discarded without saving"
            );
        }
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("id", &self.id)
            .field("workspace_id", &self.workspace_id)
            .field("runtime", &self.runtime)
            .field("framework", &self.framework)
            .field("pretraining_metadata", &self.pretraining_metadata)
            .field("posttraining_metadata", &self.posttraining_metadata)
            .field("serializable_model", &self.serializable_model)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, Payload};
    use crate::error::{ApiError, NtcoreError};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CountingApi {
        posts: Mutex<Vec<String>>,
    }

    impl ApiClient for CountingApi {
        fn do_get(&self, _path: &str) -> std::result::Result<ApiResponse, ApiError> {
            Ok(ApiResponse::Empty)
        }
        fn do_post(
            &self,
            path: &str,
            _payload: &Payload,
        ) -> std::result::Result<ApiResponse, ApiError> {
            self.posts.lock().unwrap().push(path.to_string());
            Ok(ApiResponse::Empty)
        }
        fn do_delete(&self, _path: &str) -> std::result::Result<ApiResponse, ApiError> {
            Ok(ApiResponse::Empty)
        }
    }

    #[test]
    fn test_status_transitions() {
        let client = Client::with_api_client(Arc::new(CountingApi::default()));
        let mut run = client.start_run("WS1");
        assert_eq!(run.status(), RunStatus::Created);

        run.set_pretraining_metadata(Params::from([("alpha".to_string(), json!(0.5))]));
        assert_eq!(run.status(), RunStatus::Accumulating);

        run.set_pretraining_metadata(Params::from([("alpha".to_string(), json!(0.1))]));
        assert_eq!(run.pretraining_metadata()["alpha"], json!(0.1));
    }

    #[test]
    fn test_save_without_model_fails() {
        let api = Arc::new(CountingApi::default());
        let client = Client::with_api_client(api.clone());
        let mut run = client.start_run("WS1");
        let err = run.save().unwrap_err();
        assert!(matches!(err, NtcoreError::Config(ConfigError::MissingModel)));
        assert!(api.posts.lock().unwrap().is_empty());
        assert_eq!(client.active_runs(), 1);
    }

    #[test]
    fn test_drop_releases_run() {
        let client = Client::with_api_client(Arc::new(CountingApi::default()));
        {
            let _run = client.start_run("WS1");
            assert_eq!(client.active_runs(), 1);
        }
        assert_eq!(client.active_runs(), 0);
    }
}
