//! Lightning-style training loops.
//!
//! [`ModelRecorder`] is a training callback: it records the optimizer setup
//! when fitting starts and, when fitting ends, the final callback metrics and
//! the scripted module before saving the run. [`save`] records a module file
//! written to disk, provided a workspace is named.

use semver::Version;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::args::{ArgValue, CallArgs, Metrics, Params};
use crate::client::Client;
use crate::error::{ModelError, NtcoreError};
use crate::experiment::Experiment;
use crate::framework::Framework;
use crate::interception::{Patch, PatchTarget, registry};
use crate::serializer::{SerializableModel, TorchScript};

/// From this version optimizers reach callbacks wrapped in a lightning
/// optimizer.
const WRAPPED_OPTIMIZER_FROM: Version = Version::new(1, 1, 0);

/// A trainable module.
pub trait LightningModule: TorchScript + Clone + 'static {
    /// Write the module to `path`.
    fn save(&self, path: &Path) -> Result<(), ModelError> {
        self.write_script(path)
    }
}

pub trait Optimizer {
    /// Class name, e.g. `Adam`.
    fn class_name(&self) -> &str;

    /// Default hyperparameters (`lr`, `betas`, ...).
    fn defaults(&self) -> Option<Params> {
        None
    }

    /// The optimizer inside a lightning wrapper.
    fn wrapped(&self) -> Option<&dyn Optimizer> {
        None
    }
}

pub trait Trainer {
    fn max_epochs(&self) -> Option<u64>;

    fn optimizers(&self) -> Vec<&dyn Optimizer>;

    /// Metrics logged during training, keyed by name.
    fn callback_metrics(&self) -> BTreeMap<String, Value>;

    fn library_version(&self) -> Version;
}

/// Hook points of a training loop.
pub trait Callback<M> {
    fn on_fit_start(&mut self, trainer: &dyn Trainer, module: &M);

    fn on_fit_end(&mut self, trainer: &dyn Trainer, module: &M);
}

fn optimizer_name(optimizer: &dyn Optimizer, version: &Version) -> String {
    if *version < WRAPPED_OPTIMIZER_FROM {
        return optimizer.class_name().to_string();
    }
    optimizer
        .wrapped()
        .unwrap_or(optimizer)
        .class_name()
        .to_string()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Epochs, optimizer name and optimizer defaults of a trainer.
pub fn fit_start_params(trainer: &dyn Trainer) -> Params {
    let mut params = Params::new();
    params.insert(
        "epochs".into(),
        trainer.max_epochs().map_or(Value::Null, Value::from),
    );

    if let Some(optimizer) = trainer.optimizers().first().copied() {
        params.insert(
            "optimizer_name".into(),
            Value::String(optimizer_name(optimizer, &trainer.library_version())),
        );
        let defaults = optimizer
            .defaults()
            .or_else(|| optimizer.wrapped().and_then(|inner| inner.defaults()));
        if let Some(defaults) = defaults {
            params.extend(defaults);
        }
    }
    params
}

/// Callback metrics coerced to numbers. Non-numeric entries are dropped.
pub fn fit_end_metrics(trainer: &dyn Trainer) -> Metrics {
    trainer
        .callback_metrics()
        .into_iter()
        .filter_map(|(name, value)| match numeric(&value) {
            Some(v) => Some((name, v)),
            None => {
                debug!(metric = %name, "Dropping non-numeric callback metric");
                None
            }
        })
        .collect()
}

/// Training callback that records a run.
#[derive(Debug)]
pub struct ModelRecorder {
    experiment: Experiment,
}

impl ModelRecorder {
    pub fn new(experiment: Experiment) -> Self {
        Self { experiment }
    }

    /// Recorder with a fresh run in `workspace_id`.
    pub fn for_workspace(client: &Client, workspace_id: impl Into<String>) -> Self {
        Self::new(client.start_run(workspace_id))
    }

    pub fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    pub fn into_experiment(self) -> Experiment {
        self.experiment
    }

    fn finish<M: LightningModule>(&mut self, trainer: &dyn Trainer, module: &M) -> Result<(), NtcoreError> {
        self.experiment.set_posttraining_metadata(fit_end_metrics(trainer));
        self.experiment
            .set_serializable_model(SerializableModel::TorchModule(Arc::new(module.clone())));
        self.experiment.save()?;
        Ok(())
    }
}

impl<M: LightningModule> Callback<M> for ModelRecorder {
    fn on_fit_start(&mut self, trainer: &dyn Trainer, _module: &M) {
        self.experiment.set_framework(Framework::Pytorch);
        self.experiment.set_runtime(crate::runtime_version());
        self.experiment
            .set_pretraining_metadata(fit_start_params(trainer));
    }

    fn on_fit_end(&mut self, trainer: &dyn Trainer, module: &M) {
        if let Err(err) = self.finish(trainer, module) {
            warn!(
                run_id = %self.experiment.id(),
                error = %err,
                "Failed to record model at the end of training"
            );
        }
    }
}

fn save_path(args: &CallArgs) -> Result<PathBuf, ModelError> {
    args.positional()
        .first()
        .or_else(|| args.keyword("f"))
        .and_then(ArgValue::as_str)
        .map(PathBuf::from)
        .ok_or(ModelError::MissingArgument { name: "f".into() })
}

fn original_save<M: LightningModule>(module: &mut M, args: &CallArgs) -> Result<(), ModelError> {
    module.save(&save_path(args)?)
}

fn record_save<M: LightningModule>(
    _module: &mut M,
    args: &CallArgs,
    _output: &(),
    run: &mut Experiment,
) -> Result<(), NtcoreError> {
    run.set_framework(Framework::Pytorch);
    run.set_runtime(crate::runtime_version());
    run.set_pretraining_metadata(Params::new());
    run.set_posttraining_metadata(Metrics::new());
    run.set_serializable_model(save_path(args)?);
    run.save()?;
    info!(workspace_id = run.workspace_id(), "Model is recorded");
    Ok(())
}

/// Save `module` to `path` and record the file to `workspace_id`.
///
/// Without a workspace the module is saved but not recorded.
pub fn save<M: LightningModule>(
    client: &Client,
    module: &mut M,
    path: &Path,
    workspace_id: Option<&str>,
) -> Result<(), ModelError> {
    let target = PatchTarget::of::<M>("save");
    let patch = registry().get::<M, ()>(&target).unwrap_or_else(|| {
        registry().install(Patch::after(target, original_save::<M>, record_save::<M>))
    });
    let args = CallArgs::new().arg(path.display().to_string());

    match workspace_id.map(str::trim).filter(|ws| !ws.is_empty()) {
        Some(ws) => {
            let mut run = client.start_run(ws);
            patch.call(module, args, Some(&mut run))
        }
        None => {
            warn!("Model is not recorded due to missing field(s): workspace_id");
            patch.call(module, args, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, ApiResponse, Payload};
    use crate::error::ApiError;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        posts: Mutex<Vec<(String, Payload)>>,
    }

    impl ApiClient for Recorder {
        fn do_get(&self, _path: &str) -> Result<ApiResponse, ApiError> {
            Ok(ApiResponse::Empty)
        }
        fn do_post(&self, path: &str, payload: &Payload) -> Result<ApiResponse, ApiError> {
            self.posts
                .lock()
                .unwrap()
                .push((path.to_string(), payload.clone()));
            Ok(ApiResponse::Empty)
        }
        fn do_delete(&self, _path: &str) -> Result<ApiResponse, ApiError> {
            Ok(ApiResponse::Empty)
        }
    }

    #[derive(Clone)]
    struct Perceptron {
        weights: Vec<f64>,
    }

    impl TorchScript for Perceptron {
        fn write_script(&self, path: &Path) -> Result<(), ModelError> {
            let bytes = serde_json::to_vec(&self.weights).map_err(|e| ModelError::other(e.to_string()))?;
            std::fs::write(path, bytes).map_err(|e| ModelError::other(e.to_string()))
        }
    }

    impl LightningModule for Perceptron {}

    struct Adam;

    impl Optimizer for Adam {
        fn class_name(&self) -> &str {
            "Adam"
        }
        fn defaults(&self) -> Option<Params> {
            Some(Params::from([("lr".to_string(), json!(0.001))]))
        }
    }

    struct LightningOptimizer {
        inner: Adam,
    }

    impl Optimizer for LightningOptimizer {
        fn class_name(&self) -> &str {
            "LightningOptimizer"
        }
        fn wrapped(&self) -> Option<&dyn Optimizer> {
            Some(&self.inner)
        }
    }

    struct LoopTrainer {
        version: Version,
        optimizer: LightningOptimizer,
    }

    impl Trainer for LoopTrainer {
        fn max_epochs(&self) -> Option<u64> {
            Some(10)
        }
        fn optimizers(&self) -> Vec<&dyn Optimizer> {
            vec![&self.optimizer]
        }
        fn callback_metrics(&self) -> BTreeMap<String, Value> {
            BTreeMap::from([
                ("val_loss".to_string(), json!(0.125)),
                ("val_acc".to_string(), json!("0.5")),
                ("tag".to_string(), json!("final")),
            ])
        }
        fn library_version(&self) -> Version {
            self.version.clone()
        }
    }

    fn trainer(version: Version) -> LoopTrainer {
        LoopTrainer {
            version,
            optimizer: LightningOptimizer { inner: Adam },
        }
    }

    #[test]
    fn test_optimizer_name_by_version() {
        let params = fit_start_params(&trainer(Version::new(1, 4, 0)));
        assert_eq!(params["optimizer_name"], json!("Adam"));
        assert_eq!(params["epochs"], json!(10));
        assert_eq!(params["lr"], json!(0.001));

        let params = fit_start_params(&trainer(Version::new(1, 0, 8)));
        assert_eq!(params["optimizer_name"], json!("LightningOptimizer"));
    }

    #[test]
    fn test_fit_end_metrics_are_numeric() {
        let metrics = fit_end_metrics(&trainer(Version::new(1, 4, 0)));
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics["val_acc"], 0.5);
    }

    #[test]
    fn test_recorder_saves_on_fit_end() {
        let api = Arc::new(Recorder::default());
        let client = Client::with_api_client(api.clone());
        let mut recorder = ModelRecorder::for_workspace(&client, "WS1");
        let module = Perceptron { weights: vec![0.5] };
        let trainer = trainer(Version::new(1, 4, 0));

        Callback::<Perceptron>::on_fit_start(&mut recorder, &trainer, &module);
        Callback::<Perceptron>::on_fit_end(&mut recorder, &trainer, &module);

        let posts = api.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.field_value("framework"), Some("pytorch"));
        assert_eq!(posts[0].1.file_part("model"), Some(&b"[0.5]"[..]));
        assert_eq!(
            recorder.experiment().status(),
            crate::experiment::RunStatus::Saved
        );
    }

    #[test]
    fn test_save_without_workspace_skips_recording() {
        let api = Arc::new(Recorder::default());
        let client = Client::with_api_client(api.clone());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.pt");
        let mut module = Perceptron { weights: vec![1.0] };

        save(&client, &mut module, &path, None).unwrap();
        assert!(path.exists());
        assert!(api.posts.lock().unwrap().is_empty());

        save(&client, &mut module, &path, Some("WS1")).unwrap();
        let posts = api.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.file_part("model"), Some(&b"[1.0]"[..]));
        assert_eq!(client.active_runs(), 0);
    }
}
