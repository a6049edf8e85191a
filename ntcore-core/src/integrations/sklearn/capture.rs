//! Metadata extraction from fitted estimators.

use serde_json::Value;
use tracing::{debug, warn};

use super::metrics;
use super::{Estimator, EstimatorRole};
use crate::args::{ArgValue, CallArgs, Matrix, Metrics, Params, Signature};
use crate::error::{MetricError, ModelError};

/// Prefix of metrics computed on the training data.
pub const TRAINING_PREFIX: &str = "training_";

const SAMPLE_WEIGHT: &str = "sample_weight";

/// Features, labels and sample weights of a fit call.
#[derive(Debug, Clone, Copy)]
pub struct TrainingData<'a> {
    pub x: &'a Matrix,
    pub y: Option<&'a [f64]>,
    pub sample_weight: Option<&'a [f64]>,
}

fn matrix<'a>(name: &str, value: &'a ArgValue) -> Result<&'a Matrix, ModelError> {
    value
        .as_matrix()
        .ok_or_else(|| ModelError::invalid_argument(name, "expected a feature matrix"))
}

/// `None` for absent or null arguments.
fn vector<'a>(name: &str, value: Option<&'a ArgValue>) -> Result<Option<&'a [f64]>, ModelError> {
    match value {
        None | Some(ArgValue::Value(Value::Null)) => Ok(None),
        Some(ArgValue::Vector(v)) => Ok(Some(v)),
        Some(_) => Err(ModelError::invalid_argument(name, "expected a 1-d array")),
    }
}

/// Recover X, y and sample_weight from a fit call.
///
/// The first two declared parameters name X and y, whatever they are called.
/// sample_weight is only looked up when the signature declares it.
pub fn get_x_y_and_sample_weight<'a>(
    signature: &Signature,
    args: &'a CallArgs,
) -> Result<TrainingData<'a>, ModelError> {
    let x_name = signature.name_at(0).unwrap_or("X");
    let y_name = signature.name_at(1).unwrap_or("y");
    let positional = args.positional();

    let (x, y) = match positional {
        [x, y, ..] => (matrix(x_name, x)?, vector(y_name, Some(y))?),
        [x] => (matrix(x_name, x)?, vector(y_name, args.keyword(y_name))?),
        [] => {
            let x = args
                .keyword(x_name)
                .ok_or_else(|| ModelError::MissingArgument {
                    name: x_name.to_string(),
                })?;
            (matrix(x_name, x)?, vector(y_name, args.keyword(y_name))?)
        }
    };

    let sample_weight = match signature.position(SAMPLE_WEIGHT) {
        Some(index) if positional.len() > index => vector(SAMPLE_WEIGHT, positional.get(index))?,
        Some(_) => vector(SAMPLE_WEIGHT, args.keyword(SAMPLE_WEIGHT))?,
        None => None,
    };

    Ok(TrainingData { x, y, sample_weight })
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Falsy values dropped, booleans stringified.
fn normalized(params: impl IntoIterator<Item = (String, Value)>) -> impl Iterator<Item = (String, Value)> {
    params
        .into_iter()
        .filter(|(_, v)| is_truthy(v))
        .map(|(k, v)| match v {
            Value::Bool(b) => (k, Value::String(b.to_string())),
            other => (k, other),
        })
}

/// Constructor parameters merged with `estimator_name` and `estimator_class`.
///
/// Parameter-search wrappers report their own parameters only. Falsy values
/// are dropped and booleans stringified. Non-numeric best parameters of a
/// search go through the same filter and are kept with a `best_` prefix.
pub fn pretraining_metadata<E: Estimator + ?Sized>(estimator: &E) -> Params {
    let search = estimator.parameter_search();
    let mut params: Params = normalized(estimator.get_params(search.is_none())).collect();

    if let Some(search) = search {
        let best = search
            .best_params()
            .into_iter()
            .filter(|(_, value)| value.as_f64().is_none());
        for (name, value) in normalized(best) {
            params.insert(format!("best_{name}"), value);
        }
    }

    params.insert(
        "estimator_name".into(),
        Value::String(estimator.name().to_string()),
    );
    params.insert(
        "estimator_class".into(),
        Value::String(format!("{}.{}", estimator.module(), estimator.name())),
    );
    params
}

fn record(metrics: &mut Metrics, prefix: &str, name: &str, value: Result<f64, MetricError>) {
    match value {
        Ok(v) => {
            metrics.insert(format!("{prefix}{name}"), v);
        }
        Err(e) => debug!(metric = name, error = %e, "Metric omitted"),
    }
}

fn classifier_metrics<E: Estimator + ?Sized>(
    estimator: &E,
    prefix: &str,
    data: &TrainingData<'_>,
    y_true: &[f64],
) -> Result<Metrics, MetricError> {
    let y_pred = estimator.predict(data.x)?;
    let w = data.sample_weight;
    let mut out = Metrics::new();

    record(&mut out, prefix, "precision_score", metrics::precision_score(y_true, &y_pred, w));
    record(&mut out, prefix, "recall_score", metrics::recall_score(y_true, &y_pred, w));
    record(&mut out, prefix, "f1_score", metrics::f1_score(y_true, &y_pred, w));
    record(&mut out, prefix, "accuracy_score", metrics::accuracy_score(y_true, &y_pred, w));

    if let Some(predictor) = estimator.probability_predictor() {
        match predictor.predict_proba(data.x) {
            Ok(proba) => {
                record(&mut out, prefix, "log_loss", metrics::log_loss(y_true, &proba, w));
                record(&mut out, prefix, "roc_auc_score", metrics::roc_auc_score(y_true, &proba, w));
            }
            Err(e) => debug!(error = %e, "Probability metrics omitted"),
        }
    }
    Ok(out)
}

fn regressor_metrics<E: Estimator + ?Sized>(
    estimator: &E,
    prefix: &str,
    data: &TrainingData<'_>,
    y_true: &[f64],
) -> Result<Metrics, MetricError> {
    let y_pred = estimator.predict(data.x)?;
    let w = data.sample_weight;
    let mut out = Metrics::new();

    record(&mut out, prefix, "mse", metrics::mean_squared_error(y_true, &y_pred, w));
    record(&mut out, prefix, "mae", metrics::mean_absolute_error(y_true, &y_pred, w));
    record(&mut out, prefix, "r2_score", metrics::r2_score(y_true, &y_pred, w));

    if let Some(mse) = out.get(&format!("{prefix}mse")).copied() {
        out.insert(format!("{prefix}rmse"), mse.sqrt());
    }
    Ok(out)
}

/// Role-specific metrics plus the estimator's own score. Needs labels.
pub fn estimator_content<E: Estimator + ?Sized>(
    estimator: &E,
    prefix: &str,
    data: &TrainingData<'_>,
) -> Metrics {
    let Some(y_true) = data.y else {
        return Metrics::new();
    };

    let specialized = match estimator.role() {
        EstimatorRole::Classifier => classifier_metrics(estimator, prefix, data, y_true),
        EstimatorRole::Regressor => regressor_metrics(estimator, prefix, data, y_true),
        EstimatorRole::Other => Ok(Metrics::new()),
    };
    let mut metrics = specialized.unwrap_or_else(|e| {
        warn!(
            estimator = estimator.name(),
            error = %e,
            "Failed to record metrics"
        );
        Metrics::new()
    });

    if let Some(scorer) = estimator.scorer() {
        let sample_weight = if scorer.score_signature().contains(SAMPLE_WEIGHT) {
            data.sample_weight
        } else {
            None
        };
        match scorer.score(data.x, y_true, sample_weight) {
            Ok(score) => {
                metrics.insert(format!("{prefix}score"), score);
            }
            Err(e) => warn!(
                estimator = estimator.name(),
                error = %e,
                "Scoring failed, the '{}score' metric will not be recorded",
                prefix
            ),
        }
    }
    metrics
}

/// Metrics of a fitted estimator on its training data.
pub fn posttraining_metadata<E: Estimator + ?Sized>(
    estimator: &E,
    args: &CallArgs,
) -> Result<Metrics, ModelError> {
    let data = get_x_y_and_sample_weight(&estimator.fit_signature(), args)?;
    let mut metrics = estimator_content(estimator, TRAINING_PREFIX, &data);

    if data.y.is_none() && metrics.is_empty() {
        warn!(
            estimator = estimator.name(),
            "Training metrics will not be recorded because training labels were not specified"
        );
    }

    if let Some(search) = estimator.parameter_search() {
        if let Some(best) = search.best_score() {
            metrics.insert("best_cv_score".into(), best);
        }
        for (name, value) in search.best_params() {
            if let Some(n) = value.as_f64() {
                metrics.insert(format!("best_{name}"), n);
            }
        }
    }
    Ok(metrics)
}
