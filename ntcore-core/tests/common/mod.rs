//! Shared fixtures: a recording API client and small estimators.

#![allow(dead_code)]

use ntcore_core::api::{ApiClient, ApiResponse, Payload};
use ntcore_core::args::{ArgValue, CallArgs, Matrix, Params, Signature};
use ntcore_core::error::{ApiError, ModelError};
use ntcore_core::integrations::sklearn::{
    Estimator, EstimatorRole, Fittable, ParameterSearch, ProbabilityPredictor, Scorable, metrics,
};
use ntcore_core::serializer::EstimatorDump;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: &'static str,
    pub path: String,
    pub payload: Option<Payload>,
}

/// Records every request and answers with an empty response.
#[derive(Default)]
pub struct RecordingApiClient {
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingApiClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == "POST")
            .collect()
    }

    fn record(&self, method: &'static str, path: &str, payload: Option<&Payload>) {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            payload: payload.cloned(),
        });
    }
}

impl ApiClient for RecordingApiClient {
    fn do_get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.record("GET", path, None);
        Ok(ApiResponse::Empty)
    }

    fn do_post(&self, path: &str, payload: &Payload) -> Result<ApiResponse, ApiError> {
        self.record("POST", path, Some(payload));
        Ok(ApiResponse::Json(json!({ "id": "E1" })))
    }

    fn do_delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.record("DELETE", path, None);
        Ok(ApiResponse::Empty)
    }
}

/// Refuses every request like an unreachable server.
pub struct UnreachableApiClient;

impl ApiClient for UnreachableApiClient {
    fn do_get(&self, _path: &str) -> Result<ApiResponse, ApiError> {
        Err(refused())
    }

    fn do_post(&self, _path: &str, _payload: &Payload) -> Result<ApiResponse, ApiError> {
        Err(refused())
    }

    fn do_delete(&self, _path: &str) -> Result<ApiResponse, ApiError> {
        Err(refused())
    }
}

fn refused() -> ApiError {
    ApiError::Communication {
        server: "http://localhost:8000/".into(),
        message: "connection refused".into(),
    }
}

fn labels(args: &CallArgs, signature: &Signature) -> Result<Vec<f64>, ModelError> {
    args.lookup(signature, "y")
        .and_then(ArgValue::as_vector)
        .map(<[f64]>::to_vec)
        .ok_or(ModelError::MissingArgument { name: "y".into() })
}

fn features(args: &CallArgs, signature: &Signature) -> Result<Matrix, ModelError> {
    args.lookup(signature, "X")
        .and_then(ArgValue::as_matrix)
        .cloned()
        .ok_or(ModelError::MissingArgument { name: "X".into() })
}

/// Binary classifier thresholding the first feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdClassifier {
    pub penalty: String,
    pub warm_start: bool,
    pub threshold: Option<f64>,
}

impl ThresholdClassifier {
    pub fn new() -> Self {
        Self {
            penalty: "l2".into(),
            warm_start: false,
            threshold: None,
        }
    }

    fn probability(&self, row: &[f64]) -> Result<f64, ModelError> {
        let threshold = self.threshold.ok_or(ModelError::NotFitted)?;
        Ok(1.0 / (1.0 + (-(row[0] - threshold)).exp()))
    }
}

impl EstimatorDump for ThresholdClassifier {
    fn dump(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Estimator for ThresholdClassifier {
    fn name(&self) -> &str {
        "ThresholdClassifier"
    }
    fn module(&self) -> &str {
        "fixtures.linear_model"
    }
    fn get_params(&self, _deep: bool) -> Params {
        Params::from([
            ("penalty".to_string(), json!(self.penalty)),
            ("warm_start".to_string(), json!(self.warm_start)),
        ])
    }
    fn role(&self) -> EstimatorRole {
        EstimatorRole::Classifier
    }
    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        x.iter()
            .map(|row| Ok(if self.probability(row)? >= 0.5 { 1.0 } else { 0.0 }))
            .collect()
    }
    fn probability_predictor(&self) -> Option<&dyn ProbabilityPredictor> {
        Some(self)
    }
    fn scorer(&self) -> Option<&dyn Scorable> {
        Some(self)
    }
}

impl ProbabilityPredictor for ThresholdClassifier {
    fn predict_proba(&self, x: &Matrix) -> Result<Matrix, ModelError> {
        x.iter()
            .map(|row| {
                let p = self.probability(row)?;
                Ok(vec![1.0 - p, p])
            })
            .collect()
    }
}

impl Scorable for ThresholdClassifier {
    fn score(&self, x: &Matrix, y: &[f64], sample_weight: Option<&[f64]>) -> Result<f64, ModelError> {
        let predictions = self.predict(x)?;
        metrics::accuracy_score(y, &predictions, sample_weight)
            .map_err(|e| ModelError::other(e.to_string()))
    }
}

impl Fittable for ThresholdClassifier {
    fn fit(&mut self, args: &CallArgs) -> Result<(), ModelError> {
        let signature = self.fit_signature();
        let x = features(args, &signature)?;
        let y = labels(args, &signature)?;
        let mean = |class: f64| {
            let values: Vec<f64> = x
                .iter()
                .zip(&y)
                .filter(|(_, label)| **label == class)
                .map(|(row, _)| row[0])
                .collect();
            values.iter().sum::<f64>() / values.len().max(1) as f64
        };
        self.threshold = Some((mean(0.0) + mean(1.0)) / 2.0);
        Ok(())
    }

    fn fit_predict(&mut self, args: &CallArgs) -> Result<Vec<f64>, ModelError> {
        self.fit(args)?;
        self.predict(&features(args, &self.fit_signature())?)
    }
}

/// Classifier without probability estimates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NearestCentroid {
    pub centroids: Vec<(f64, f64)>,
}

impl EstimatorDump for NearestCentroid {
    fn dump(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Estimator for NearestCentroid {
    fn name(&self) -> &str {
        "NearestCentroid"
    }
    fn module(&self) -> &str {
        "fixtures.neighbors"
    }
    fn get_params(&self, _deep: bool) -> Params {
        Params::from([("metric".to_string(), json!("euclidean"))])
    }
    fn role(&self) -> EstimatorRole {
        EstimatorRole::Classifier
    }
    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        if self.centroids.is_empty() {
            return Err(ModelError::NotFitted);
        }
        Ok(x.iter()
            .map(|row| {
                self.centroids
                    .iter()
                    .min_by(|a, b| (row[0] - a.1).abs().total_cmp(&(row[0] - b.1).abs()))
                    .map_or(0.0, |c| c.0)
            })
            .collect())
    }
}

impl Fittable for NearestCentroid {
    fn fit(&mut self, args: &CallArgs) -> Result<(), ModelError> {
        let signature = self.fit_signature();
        let x = features(args, &signature)?;
        let y = labels(args, &signature)?;
        let mut classes = y.clone();
        classes.sort_by(f64::total_cmp);
        classes.dedup();
        self.centroids = classes
            .into_iter()
            .map(|class| {
                let values: Vec<f64> = x
                    .iter()
                    .zip(&y)
                    .filter(|(_, label)| **label == class)
                    .map(|(row, _)| row[0])
                    .collect();
                (class, values.iter().sum::<f64>() / values.len() as f64)
            })
            .collect();
        Ok(())
    }
}

/// Weighted least squares on the first feature.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    pub fit_intercept: bool,
    pub slope: f64,
    pub intercept: f64,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            fit_intercept: true,
            ..Default::default()
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept + self.slope * row[0]
    }
}

impl EstimatorDump for LinearRegression {
    fn dump(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Estimator for LinearRegression {
    fn name(&self) -> &str {
        "LinearRegression"
    }
    fn module(&self) -> &str {
        "fixtures.linear_model"
    }
    fn get_params(&self, _deep: bool) -> Params {
        Params::from([
            ("fit_intercept".to_string(), json!(self.fit_intercept)),
            ("n_jobs".to_string(), json!(null)),
        ])
    }
    fn role(&self) -> EstimatorRole {
        EstimatorRole::Regressor
    }
    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        Ok(x.iter().map(|row| self.predict_row(row)).collect())
    }
}

impl Fittable for LinearRegression {
    fn fit(&mut self, args: &CallArgs) -> Result<(), ModelError> {
        let signature = self.fit_signature();
        let x = features(args, &signature)?;
        let y = labels(args, &signature)?;
        let w = args
            .lookup(&signature, "sample_weight")
            .and_then(ArgValue::as_vector)
            .map(<[f64]>::to_vec)
            .unwrap_or_else(|| vec![1.0; y.len()]);

        let total: f64 = w.iter().sum();
        let mean_x = x.iter().zip(&w).map(|(r, w)| r[0] * w).sum::<f64>() / total;
        let mean_y = y.iter().zip(&w).map(|(v, w)| v * w).sum::<f64>() / total;
        let (mut cov, mut var) = (0.0, 0.0);
        for ((row, target), weight) in x.iter().zip(&y).zip(&w) {
            cov += weight * (row[0] - mean_x) * (target - mean_y);
            var += weight * (row[0] - mean_x).powi(2);
        }
        self.slope = if var == 0.0 { 0.0 } else { cov / var };
        self.intercept = if self.fit_intercept {
            mean_y - self.slope * mean_x
        } else {
            0.0
        };
        Ok(())
    }
}

/// Grid search over `fit_intercept` of a [`LinearRegression`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridSearch {
    pub cv: i64,
    pub best: Option<LinearRegression>,
    pub best_score: Option<f64>,
}

impl EstimatorDump for GridSearch {
    fn dump(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Estimator for GridSearch {
    fn name(&self) -> &str {
        "GridSearch"
    }
    fn module(&self) -> &str {
        "fixtures.model_selection"
    }
    fn get_params(&self, deep: bool) -> Params {
        let mut params = Params::from([("cv".to_string(), json!(self.cv))]);
        if deep {
            params.insert("estimator__fit_intercept".into(), json!(true));
        }
        params
    }
    fn role(&self) -> EstimatorRole {
        EstimatorRole::Regressor
    }
    fn predict(&self, x: &Matrix) -> Result<Vec<f64>, ModelError> {
        self.best.as_ref().ok_or(ModelError::NotFitted)?.predict(x)
    }
    fn parameter_search(&self) -> Option<&dyn ParameterSearch> {
        Some(self)
    }
}

impl ParameterSearch for GridSearch {
    fn best_score(&self) -> Option<f64> {
        self.best_score
    }
    fn best_params(&self) -> Params {
        match &self.best {
            Some(best) => Params::from([
                ("fit_intercept".to_string(), json!(best.fit_intercept)),
                ("alpha".to_string(), json!(0.5)),
                ("solver".to_string(), json!("svd")),
            ]),
            None => Params::new(),
        }
    }
}

impl Fittable for GridSearch {
    fn fit(&mut self, args: &CallArgs) -> Result<(), ModelError> {
        let signature = self.fit_signature();
        let x = features(args, &signature)?;
        let y = labels(args, &signature)?;
        let mut best: Option<(f64, LinearRegression)> = None;
        for fit_intercept in [true, false] {
            let mut candidate = LinearRegression {
                fit_intercept,
                ..Default::default()
            };
            candidate.fit(args)?;
            let predictions = candidate.predict(&x)?;
            let score = metrics::r2_score(&y, &predictions, None).unwrap_or(f64::MIN);
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, candidate));
            }
        }
        if let Some((score, model)) = best {
            self.best_score = Some(score);
            self.best = Some(model);
        }
        Ok(())
    }
}
