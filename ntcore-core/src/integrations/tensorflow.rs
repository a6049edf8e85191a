//! Keras-style models and estimator-style trainers.
//!
//! `fit` and `fit_generator` record the call's parameters, `evaluate` records
//! the full metric dictionary, `train` records step counts, and `save` or
//! `export_saved_model` attach the model and save the run.

use semver::Version;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::args::{CallArgs, Metrics, Params, Signature, run_params_for_call};
use crate::error::{ModelError, NtcoreError};
use crate::experiment::Experiment;
use crate::framework::Framework;
use crate::interception::{Around, Hook, Original, Patch, PatchTarget, registry};
use crate::serializer::{SavedModelExport, SerializableModel};

/// Call parameters never recorded from `fit`.
pub const UNLOGGED_FIT_PARAMS: &[&str] = &["self", "x", "y", "callbacks", "validation_data", "verbose"];

/// Versions from which `fit_generator` is a plain alias of `fit` and is not
/// recorded separately.
const FIT_GENERATOR_ALIAS_FROM: Version = Version::new(2, 1, 0);

/// Result of `evaluate`.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Metric name to value.
    Dict(Metrics),
    /// Values ordered like `metrics_names`.
    List(Vec<f64>),
    /// A model with a single metric.
    Scalar(f64),
}

impl Evaluation {
    /// Name the values of a legacy result after `metrics_names`.
    pub fn into_metrics(self, metrics_names: &[String]) -> Metrics {
        match self {
            Self::Dict(metrics) => metrics,
            Self::List(values) => metrics_names.iter().cloned().zip(values).collect(),
            Self::Scalar(value) => metrics_names
                .first()
                .map(|name| Metrics::from([(name.clone(), value)]))
                .unwrap_or_default(),
        }
    }
}

/// Legacy ordering of an evaluation dictionary: names in `metrics_names`
/// order first, the remaining keys sorted, and a lone value as a scalar.
pub fn flatten_metrics_in_order(logs: &Metrics, metrics_names: &[String]) -> Evaluation {
    let mut results: Vec<f64> = metrics_names
        .iter()
        .filter_map(|name| logs.get(name).copied())
        .collect();
    results.extend(
        logs.iter()
            .filter(|(key, _)| !metrics_names.contains(key))
            .map(|(_, value)| *value),
    );
    match results.as_slice() {
        [single] => Evaluation::Scalar(*single),
        _ => Evaluation::List(results),
    }
}

/// A Keras-style model.
pub trait KerasModel: SavedModelExport + Clone + 'static {
    /// Declared parameters of `fit` with their defaults.
    fn fit_signature(&self) -> Signature {
        Signature::with_defaults([
            ("x", Some(Value::Null)),
            ("y", Some(Value::Null)),
            ("batch_size", Some(Value::Null)),
            ("epochs", Some(json!(1))),
            ("verbose", Some(json!("auto"))),
            ("callbacks", Some(Value::Null)),
            ("validation_split", Some(json!(0.0))),
            ("validation_data", Some(Value::Null)),
            ("shuffle", Some(json!(true))),
            ("class_weight", Some(Value::Null)),
            ("sample_weight", Some(Value::Null)),
            ("initial_epoch", Some(json!(0))),
            ("steps_per_epoch", Some(Value::Null)),
            ("validation_steps", Some(Value::Null)),
            ("validation_batch_size", Some(Value::Null)),
            ("validation_freq", Some(json!(1))),
            ("max_queue_size", Some(json!(10))),
            ("workers", Some(json!(1))),
            ("use_multiprocessing", Some(json!(false))),
        ])
    }

    fn fit(&mut self, args: &CallArgs) -> Result<(), ModelError>;

    fn fit_generator(&mut self, args: &CallArgs) -> Result<(), ModelError> {
        self.fit(args)
    }

    /// Evaluate. A `return_dict` keyword selects the dictionary form.
    fn evaluate(&mut self, args: &CallArgs) -> Result<Evaluation, ModelError>;

    fn metrics_names(&self) -> Vec<String>;

    fn save(&mut self, args: &CallArgs) -> Result<(), ModelError>;

    fn library_version(&self) -> Option<Version> {
        None
    }
}

/// An estimator-style trainer.
pub trait TfEstimator: Clone + 'static {
    fn train_signature(&self) -> Signature {
        Signature::with_defaults([
            ("input_fn", None),
            ("hooks", Some(Value::Null)),
            ("steps", Some(Value::Null)),
            ("max_steps", Some(Value::Null)),
            ("saving_listeners", Some(Value::Null)),
        ])
    }

    fn train(&mut self, args: &CallArgs) -> Result<(), ModelError>;

    /// Export a SavedModel, returning the export directory.
    fn export_saved_model(&mut self, args: &CallArgs) -> Result<PathBuf, ModelError>;

    /// Older name of [`export_saved_model`](Self::export_saved_model).
    fn export_savedmodel(&mut self, args: &CallArgs) -> Result<PathBuf, ModelError> {
        self.export_saved_model(args)
    }
}

fn set_pretraining(run: &mut Experiment, params: Params) {
    if !params.is_empty() {
        run.set_pretraining_metadata(params);
    }
}

fn set_posttraining(run: &mut Experiment, metrics: Metrics) {
    if !metrics.is_empty() {
        run.set_posttraining_metadata(metrics);
    }
}

fn install_after<M: 'static, T: 'static>(
    method: &str,
    original: Original<M, T>,
    hook: Hook<M, T>,
) -> Arc<Patch<M, T>> {
    let target = PatchTarget::of::<M>(method);
    registry()
        .get::<M, T>(&target)
        .unwrap_or_else(|| registry().install(Patch::after(target, original, hook)))
}

fn install_around<M: 'static, T: 'static>(
    method: &str,
    original: Original<M, T>,
    around: Around<M, T>,
) -> Arc<Patch<M, T>> {
    let target = PatchTarget::of::<M>(method);
    registry()
        .get::<M, T>(&target)
        .unwrap_or_else(|| registry().install(Patch::around(target, original, around)))
}

fn record_fit<M: KerasModel>(
    model: &mut M,
    args: &CallArgs,
    _output: &(),
    run: &mut Experiment,
) -> Result<(), NtcoreError> {
    let params = run_params_for_call(&model.fit_signature(), args, UNLOGGED_FIT_PARAMS);
    set_pretraining(run, params);
    Ok(())
}

fn evaluate_around<M: KerasModel>(
    original: Original<M, Evaluation>,
    model: &mut M,
    mut args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<Evaluation, ModelError> {
    let Some(run) = experiment else {
        return original(model, &args);
    };

    let return_dict = args
        .take_keyword("return_dict")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    args.set_keyword("return_dict", true);

    let names = model.metrics_names();
    let metrics = original(model, &args)?.into_metrics(&names);
    set_posttraining(run, metrics.clone());

    if return_dict {
        Ok(Evaluation::Dict(metrics))
    } else {
        Ok(flatten_metrics_in_order(&metrics, &names))
    }
}

fn record_save<M: KerasModel>(
    model: &mut M,
    _args: &CallArgs,
    _output: &(),
    run: &mut Experiment,
) -> Result<(), NtcoreError> {
    run.set_framework(Framework::Tensorflow);
    run.set_serializable_model(SerializableModel::SavedModel(Arc::new(model.clone())));
    run.save()?;
    Ok(())
}

fn record_train<E: TfEstimator>(
    model: &mut E,
    args: &CallArgs,
    _output: &(),
    run: &mut Experiment,
) -> Result<(), NtcoreError> {
    let signature = model.train_signature();
    let params: Params = ["steps", "max_steps"]
        .into_iter()
        .filter_map(|name| {
            let value = args.lookup(&signature, name)?.to_param()?;
            Some((name.to_string(), value))
        })
        .collect();
    set_pretraining(run, params);
    Ok(())
}

fn record_export<E: TfEstimator>(
    _model: &mut E,
    _args: &CallArgs,
    export_dir: &PathBuf,
    run: &mut Experiment,
) -> Result<(), NtcoreError> {
    run.set_framework(Framework::Tensorflow);
    run.set_serializable_model(export_dir.clone());
    run.save()?;
    Ok(())
}

/// Fit a Keras-style model.
pub fn fit<M: KerasModel>(
    model: &mut M,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<(), ModelError> {
    install_after::<M, ()>("fit", |m, a| m.fit(a), record_fit::<M>).call(model, args, experiment)
}

/// Fit from a generator. Recorded only for models older than 2.1.0, where it
/// is a separate entry point.
pub fn fit_generator<M: KerasModel>(
    model: &mut M,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<(), ModelError> {
    if model
        .library_version()
        .is_some_and(|v| v >= FIT_GENERATOR_ALIAS_FROM)
    {
        debug!("fit_generator is an alias of fit, not recorded");
        return model.fit_generator(&args);
    }
    install_after::<M, ()>("fit_generator", |m, a| m.fit_generator(a), record_fit::<M>)
        .call(model, args, experiment)
}

/// Evaluate, recording every metric to `experiment`. The caller still gets
/// the result form it asked for.
pub fn evaluate<M: KerasModel>(
    model: &mut M,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<Evaluation, ModelError> {
    install_around::<M, Evaluation>("evaluate", |m, a| m.evaluate(a), evaluate_around::<M>)
        .call(model, args, experiment)
}

/// Save the model, then attach it to `experiment` and save the run.
pub fn save<M: KerasModel>(
    model: &mut M,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<(), ModelError> {
    install_after::<M, ()>("save", |m, a| m.save(a), record_save::<M>).call(model, args, experiment)
}

pub fn train<E: TfEstimator>(
    model: &mut E,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<(), ModelError> {
    install_after::<E, ()>("train", |m, a| m.train(a), record_train::<E>).call(model, args, experiment)
}

pub fn export_saved_model<E: TfEstimator>(
    model: &mut E,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<PathBuf, ModelError> {
    install_after::<E, PathBuf>(
        "export_saved_model",
        |m, a| m.export_saved_model(a),
        record_export::<E>,
    )
    .call(model, args, experiment)
}

pub fn export_savedmodel<E: TfEstimator>(
    model: &mut E,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<PathBuf, ModelError> {
    install_after::<E, PathBuf>(
        "export_savedmodel",
        |m, a| m.export_savedmodel(a),
        record_export::<E>,
    )
    .call(model, args, experiment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiClient, ApiResponse, Payload};
    use crate::client::Client;
    use crate::error::ApiError;
    use std::path::Path;
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

    #[derive(Clone, Default)]
    struct Sequential {
        epochs: i64,
        version: Option<Version>,
    }

    impl SavedModelExport for Sequential {
        fn write_saved_model(&self, dir: &Path) -> Result<(), ModelError> {
            std::fs::write(dir.join("saved_model.pb"), self.epochs.to_string())
                .map_err(|e| ModelError::other(e.to_string()))
        }
    }

    impl KerasModel for Sequential {
        fn fit(&mut self, args: &CallArgs) -> Result<(), ModelError> {
            self.epochs = args
                .lookup(&self.fit_signature(), "epochs")
                .and_then(|v| v.as_value())
                .and_then(Value::as_i64)
                .unwrap_or(1);
            Ok(())
        }

        fn evaluate(&mut self, args: &CallArgs) -> Result<Evaluation, ModelError> {
            let logs = Metrics::from([
                ("loss".to_string(), 0.25),
                ("accuracy".to_string(), 0.9),
                ("auc".to_string(), 0.95),
            ]);
            if args.keyword("return_dict").and_then(|v| v.as_bool()) == Some(true) {
                Ok(Evaluation::Dict(logs))
            } else {
                Ok(Evaluation::List(vec![0.25, 0.9, 0.95]))
            }
        }

        fn metrics_names(&self) -> Vec<String> {
            vec!["loss".into(), "accuracy".into(), "auc".into()]
        }

        fn save(&mut self, _args: &CallArgs) -> Result<(), ModelError> {
            Ok(())
        }

        fn library_version(&self) -> Option<Version> {
            self.version.clone()
        }
    }

    fn client() -> (Arc<Recorder>, Client) {
        let api = Arc::new(Recorder::default());
        (api.clone(), Client::with_api_client(api))
    }

    #[test]
    fn test_flatten_metrics_in_order() {
        let logs = Metrics::from([
            ("loss".to_string(), 1.0),
            ("b".to_string(), 3.0),
            ("a".to_string(), 2.0),
        ]);
        assert_eq!(
            flatten_metrics_in_order(&logs, &["loss".into()]),
            Evaluation::List(vec![1.0, 2.0, 3.0])
        );
        let single = Metrics::from([("loss".to_string(), 1.0)]);
        assert_eq!(
            flatten_metrics_in_order(&single, &["loss".into()]),
            Evaluation::Scalar(1.0)
        );
    }

    #[test]
    fn test_evaluate_without_run_is_untouched() {
        let mut model = Sequential::default();
        let out = evaluate(&mut model, CallArgs::new(), None).unwrap();
        assert_eq!(out, Evaluation::List(vec![0.25, 0.9, 0.95]));
    }

    #[test]
    fn test_evaluate_records_dict_and_returns_legacy_form() {
        let (_api, client) = client();
        let mut run = client.start_run("WS1");
        let mut model = Sequential::default();

        let out = evaluate(&mut model, CallArgs::new(), Some(&mut run)).unwrap();
        assert_eq!(out, Evaluation::List(vec![0.25, 0.9, 0.95]));
        assert_eq!(run.posttraining_metadata()["accuracy"], 0.9);

        let out = evaluate(
            &mut model,
            CallArgs::new().kwarg("return_dict", true),
            Some(&mut run),
        )
        .unwrap();
        assert!(matches!(out, Evaluation::Dict(ref m) if m.len() == 3));
    }

    #[test]
    fn test_fit_records_params() {
        let (_api, client) = client();
        let mut run = client.start_run("WS1");
        let mut model = Sequential::default();
        let args = CallArgs::new()
            .arg(vec![vec![0.0]])
            .arg(vec![1.0])
            .kwarg("epochs", 5i64)
            .kwarg("verbose", 0i64);
        fit(&mut model, args, Some(&mut run)).unwrap();

        let params = run.pretraining_metadata();
        assert_eq!(model.epochs, 5);
        assert_eq!(params["epochs"], json!(5));
        assert_eq!(params["shuffle"], json!(true));
        for name in UNLOGGED_FIT_PARAMS {
            assert!(!params.contains_key(*name), "{name} must not be logged");
        }
    }

    #[test]
    fn test_fit_generator_alias_not_recorded() {
        let (_api, client) = client();
        let mut run = client.start_run("WS1");
        let mut model = Sequential {
            epochs: 0,
            version: Some(Version::new(2, 4, 0)),
        };
        fit_generator(&mut model, CallArgs::new().kwarg("epochs", 3i64), Some(&mut run)).unwrap();
        assert_eq!(model.epochs, 3);
        assert!(run.pretraining_metadata().is_empty());
    }

    #[test]
    fn test_save_emits_once() {
        let (api, client) = client();
        let mut run = client.start_run("WS1");
        let mut model = Sequential::default();
        save(&mut model, CallArgs::new().arg("model_dir"), Some(&mut run)).unwrap();

        let posts = api.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, "WS1/experiment");
        assert_eq!(posts[0].1.field_value("framework"), Some("tensorflow"));
    }

    #[derive(Clone)]
    struct LinearEstimator {
        export_dir: PathBuf,
    }

    impl TfEstimator for LinearEstimator {
        fn train(&mut self, _args: &CallArgs) -> Result<(), ModelError> {
            Ok(())
        }

        fn export_saved_model(&mut self, _args: &CallArgs) -> Result<PathBuf, ModelError> {
            std::fs::create_dir_all(&self.export_dir).map_err(|e| ModelError::other(e.to_string()))?;
            std::fs::write(self.export_dir.join("saved_model.pb"), b"graph")
                .map_err(|e| ModelError::other(e.to_string()))?;
            Ok(self.export_dir.clone())
        }
    }

    #[test]
    fn test_train_records_steps() {
        let (_api, client) = client();
        let mut run = client.start_run("WS1");
        let mut model = LinearEstimator {
            export_dir: PathBuf::from("unused"),
        };
        let args = CallArgs::new()
            .arg("input_fn")
            .arg(Value::Null)
            .arg(100i64)
            .kwarg("max_steps", 500i64);
        train(&mut model, args, Some(&mut run)).unwrap();
        assert_eq!(run.pretraining_metadata()["steps"], json!(100));
        assert_eq!(run.pretraining_metadata()["max_steps"], json!(500));
    }

    #[test]
    fn test_export_saved_model_uploads_archive() {
        let dir = tempfile::tempdir().unwrap();
        let (api, client) = client();
        let mut run = client.start_run("WS1");
        let mut model = LinearEstimator {
            export_dir: dir.path().join("export"),
        };
        let path = export_saved_model(&mut model, CallArgs::new(), Some(&mut run)).unwrap();
        assert_eq!(path, dir.path().join("export"));

        let posts = api.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].1.file_part("model").is_some_and(|b| !b.is_empty()));
    }
}
