//! Scikit-learn style estimators.
//!
//! Estimators describe themselves through [`Estimator`] and the optional
//! capabilities it exposes. Training goes through [`fit`], [`fit_transform`]
//! or [`fit_predict`]; when a run is passed, the fitted estimator's
//! parameters, training metrics and a snapshot of the model are recorded and
//! the run is saved.

pub mod capture;
pub mod metrics;

use std::sync::Arc;

use crate::args::{CallArgs, Matrix, Params, Signature};
use crate::error::{ModelError, NtcoreError};
use crate::experiment::Experiment;
use crate::framework::Framework;
use crate::interception::{Original, Patch, PatchTarget, registry};
use crate::serializer::{EstimatorDump, SerializableModel};

pub use capture::{TRAINING_PREFIX, posttraining_metadata, pretraining_metadata};

/// What an estimator predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorRole {
    Classifier,
    Regressor,
    Other,
}

/// A fitted or unfitted estimator.
pub trait Estimator: EstimatorDump + Send + Sync {
    /// Class name, e.g. `LogisticRegression`.
    fn name(&self) -> &str;

    /// Module path the class lives in.
    fn module(&self) -> &str;

    /// Constructor parameters. `deep` includes parameters of nested estimators.
    fn get_params(&self, deep: bool) -> Params;

    /// Declared parameters of `fit`, excluding the receiver.
    fn fit_signature(&self) -> Signature {
        Signature::new(["X", "y", "sample_weight"])
    }

    fn role(&self) -> EstimatorRole {
        EstimatorRole::Other
    }

    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError>;

    fn probability_predictor(&self) -> Option<&dyn ProbabilityPredictor> {
        None
    }

    fn scorer(&self) -> Option<&dyn Scorable> {
        None
    }

    /// Present on grid and randomized search wrappers.
    fn parameter_search(&self) -> Option<&dyn ParameterSearch> {
        None
    }
}

pub trait ProbabilityPredictor {
    /// One row per sample, one column per class in ascending label order.
    fn predict_proba(&self, x: &Matrix) -> Result<Matrix, ModelError>;
}

pub trait Scorable {
    fn score_signature(&self) -> Signature {
        Signature::new(["X", "y", "sample_weight"])
    }

    fn score(&self, x: &Matrix, y: &[f64], sample_weight: Option<&[f64]>)
    -> Result<f64, ModelError>;
}

pub trait ParameterSearch {
    fn best_score(&self) -> Option<f64>;

    fn best_params(&self) -> Params;
}

/// Training entry points.
pub trait Fittable: Estimator {
    fn fit(&mut self, args: &CallArgs) -> Result<(), ModelError>;

    fn fit_transform(&mut self, _args: &CallArgs) -> Result<Matrix, ModelError> {
        Err(ModelError::Unsupported {
            model: self.name().to_string(),
            method: "fit_transform".into(),
        })
    }

    fn fit_predict(&mut self, _args: &CallArgs) -> Result<Vec<f64>, ModelError> {
        Err(ModelError::Unsupported {
            model: self.name().to_string(),
            method: "fit_predict".into(),
        })
    }
}

fn original_fit<M: Fittable>(model: &mut M, args: &CallArgs) -> Result<(), ModelError> {
    model.fit(args)
}

fn original_fit_transform<M: Fittable>(model: &mut M, args: &CallArgs) -> Result<Matrix, ModelError> {
    model.fit_transform(args)
}

fn original_fit_predict<M: Fittable>(model: &mut M, args: &CallArgs) -> Result<Vec<f64>, ModelError> {
    model.fit_predict(args)
}

/// Record a fitted estimator onto the run and save it.
fn record_fit<M, T>(
    model: &mut M,
    args: &CallArgs,
    _output: &T,
    run: &mut Experiment,
) -> Result<(), NtcoreError>
where
    M: Fittable + Clone + 'static,
{
    let pretraining = pretraining_metadata(&*model);
    let posttraining = posttraining_metadata(&*model, args)?;

    run.set_pretraining_metadata(pretraining);
    run.set_posttraining_metadata(posttraining);
    run.set_framework(Framework::Sklearn);
    run.set_serializable_model(SerializableModel::Estimator(Arc::new(model.clone())));
    run.save()?;
    Ok(())
}

fn patch<M, T>(method: &str, original: Original<M, T>) -> Arc<Patch<M, T>>
where
    M: Fittable + Clone + 'static,
    T: 'static,
{
    let target = PatchTarget::of::<M>(method);
    registry()
        .get::<M, T>(&target)
        .unwrap_or_else(|| registry().install(Patch::after(target, original, record_fit::<M, T>)))
}

/// Wrap `fit`, `fit_transform` and `fit_predict` of `M`. Repeated calls are
/// no-ops.
pub fn install<M: Fittable + Clone + 'static>() {
    patch::<M, ()>("fit", original_fit::<M>);
    patch::<M, Matrix>("fit_transform", original_fit_transform::<M>);
    patch::<M, Vec<f64>>("fit_predict", original_fit_predict::<M>);
}

/// Fit `model`, recording to `experiment` when given.
pub fn fit<M: Fittable + Clone + 'static>(
    model: &mut M,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<(), ModelError> {
    patch::<M, ()>("fit", original_fit::<M>).call(model, args, experiment)
}

pub fn fit_transform<M: Fittable + Clone + 'static>(
    model: &mut M,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<Matrix, ModelError> {
    patch::<M, Matrix>("fit_transform", original_fit_transform::<M>).call(model, args, experiment)
}

pub fn fit_predict<M: Fittable + Clone + 'static>(
    model: &mut M,
    args: CallArgs,
    experiment: Option<&mut Experiment>,
) -> Result<Vec<f64>, ModelError> {
    patch::<M, Vec<f64>>("fit_predict", original_fit_predict::<M>).call(model, args, experiment)
}
