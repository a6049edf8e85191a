//! Training metrics for classifiers and regressors.
//!
//! Every function accepts optional per-sample weights. Labels are compared
//! as floats; class order is ascending.

use std::cmp::Ordering;

use crate::args::Matrix;
use crate::error::MetricError;

type MetricResult = Result<f64, MetricError>;

fn check_lengths(left: usize, right: usize) -> Result<(), MetricError> {
    if left != right {
        return Err(MetricError::LengthMismatch { left, right });
    }
    if left == 0 {
        return Err(MetricError::Empty);
    }
    Ok(())
}

fn weights(n: usize, sample_weight: Option<&[f64]>) -> Result<Vec<f64>, MetricError> {
    match sample_weight {
        Some(w) => {
            check_lengths(n, w.len())?;
            Ok(w.to_vec())
        }
        None => Ok(vec![1.0; n]),
    }
}

fn weighted_mean(values: impl Iterator<Item = f64>, w: &[f64]) -> MetricResult {
    let total: f64 = w.iter().sum();
    if total == 0.0 {
        return Err(MetricError::undefined("weights sum to zero"));
    }
    Ok(values.zip(w).map(|(v, w)| v * w).sum::<f64>() / total)
}

fn sorted_unique(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut labels: Vec<f64> = values.collect();
    labels.sort_by(f64::total_cmp);
    labels.dedup();
    labels
}

/// Ascending distinct labels of `y_true` and `y_pred` together.
pub fn unique_labels(y_true: &[f64], y_pred: &[f64]) -> Vec<f64> {
    sorted_unique(y_true.iter().chain(y_pred).copied())
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    tp: f64,
    fp: f64,
    fn_: f64,
}

impl Counts {
    fn support(&self) -> f64 {
        self.tp + self.fn_
    }
}

fn per_label_counts(y_true: &[f64], y_pred: &[f64], w: &[f64]) -> Vec<Counts> {
    unique_labels(y_true, y_pred)
        .into_iter()
        .map(|label| {
            let mut c = Counts::default();
            for ((&t, &p), &w) in y_true.iter().zip(y_pred).zip(w) {
                match (t == label, p == label) {
                    (true, true) => c.tp += w,
                    (false, true) => c.fp += w,
                    (true, false) => c.fn_ += w,
                    (false, false) => {}
                }
            }
            c
        })
        .collect()
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 { 0.0 } else { num / den }
}

/// Support-weighted average of a per-label score.
fn weighted_average(
    y_true: &[f64],
    y_pred: &[f64],
    sample_weight: Option<&[f64]>,
    score: impl Fn(&Counts) -> f64,
) -> MetricResult {
    check_lengths(y_true.len(), y_pred.len())?;
    let w = weights(y_true.len(), sample_weight)?;
    let counts = per_label_counts(y_true, y_pred, &w);
    let total_support: f64 = counts.iter().map(Counts::support).sum();
    if total_support == 0.0 {
        return Ok(0.0);
    }
    Ok(counts.iter().map(|c| score(c) * c.support()).sum::<f64>() / total_support)
}

/// Precision averaged over labels, weighted by support.
pub fn precision_score(y_true: &[f64], y_pred: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    weighted_average(y_true, y_pred, sample_weight, |c| ratio(c.tp, c.tp + c.fp))
}

pub fn recall_score(y_true: &[f64], y_pred: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    weighted_average(y_true, y_pred, sample_weight, |c| ratio(c.tp, c.tp + c.fn_))
}

pub fn f1_score(y_true: &[f64], y_pred: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    weighted_average(y_true, y_pred, sample_weight, |c| {
        ratio(2.0 * c.tp, 2.0 * c.tp + c.fp + c.fn_)
    })
}

/// Fraction of correct predictions.
pub fn accuracy_score(y_true: &[f64], y_pred: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    check_lengths(y_true.len(), y_pred.len())?;
    let w = weights(y_true.len(), sample_weight)?;
    weighted_mean(
        y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| if t == p { 1.0 } else { 0.0 }),
        &w,
    )
}

fn label_index(labels: &[f64], value: f64) -> Option<usize> {
    labels.iter().position(|&l| l == value)
}

/// Cross-entropy of predicted class probabilities.
///
/// Columns correspond to the ascending labels of `y_true`. A single column is
/// read as the probability of the greater label. Probabilities are clipped to
/// `[eps, 1 - eps]` and each row renormalized.
pub fn log_loss(y_true: &[f64], y_proba: &Matrix, sample_weight: Option<&[f64]>) -> MetricResult {
    check_lengths(y_true.len(), y_proba.len())?;
    let w = weights(y_true.len(), sample_weight)?;
    let labels = sorted_unique(y_true.iter().copied());
    if labels.len() < 2 {
        return Err(MetricError::undefined(
            "y_true contains only one label, log loss needs at least two",
        ));
    }

    let eps = f64::EPSILON;
    let mut losses = Vec::with_capacity(y_true.len());
    for (&t, row) in y_true.iter().zip(y_proba) {
        let row: Vec<f64> = if row.len() == 1 && labels.len() == 2 {
            vec![1.0 - row[0], row[0]]
        } else {
            row.clone()
        };
        if row.len() != labels.len() {
            return Err(MetricError::undefined(format!(
                "y_true has {} labels but y_pred has {} columns",
                labels.len(),
                row.len()
            )));
        }
        let clipped: Vec<f64> = row.iter().map(|p| p.clamp(eps, 1.0 - eps)).collect();
        let total: f64 = clipped.iter().sum();
        let idx = label_index(&labels, t).ok_or_else(|| MetricError::undefined("unknown label"))?;
        losses.push(-(clipped[idx] / total).ln());
    }
    weighted_mean(losses.into_iter(), &w)
}

/// Weighted area under the ROC curve of a binary problem. `positive` marks
/// samples of the positive class.
fn binary_roc_auc(positive: &[bool], scores: &[f64], w: &[f64]) -> MetricResult {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));

    let (mut tps, mut fps) = (0.0, 0.0);
    let mut curve = vec![(0.0, 0.0)];
    for (i, &idx) in order.iter().enumerate() {
        if positive[idx] {
            tps += w[idx];
        } else {
            fps += w[idx];
        }
        let is_threshold_end = order
            .get(i + 1)
            .is_none_or(|&next| scores[next] != scores[idx]);
        if is_threshold_end {
            curve.push((fps, tps));
        }
    }

    if tps <= 0.0 || fps <= 0.0 {
        return Err(MetricError::undefined(
            "Only one class present in y_true. ROC AUC score is not defined in that case.",
        ));
    }

    Ok(curve
        .windows(2)
        .map(|pair| {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            (x1 - x0) / fps * (y0 + y1) / tps / 2.0
        })
        .sum())
}

/// ROC-AUC of class probabilities.
///
/// Two columns (or one) are treated as a binary problem scored by the
/// probability of the greater label. More columns use the one-vs-one scheme
/// averaged by pair prevalence, which does not support sample weights.
pub fn roc_auc_score(y_true: &[f64], y_proba: &Matrix, sample_weight: Option<&[f64]>) -> MetricResult {
    check_lengths(y_true.len(), y_proba.len())?;
    let n_cols = y_proba.first().map_or(0, Vec::len);
    match n_cols {
        1 | 2 => {
            let scores = y_proba
                .iter()
                .map(|row| (row.len() == n_cols).then(|| row[n_cols - 1]))
                .collect::<Option<Vec<f64>>>()
                .ok_or_else(|| MetricError::undefined("ragged probability rows"))?;
            binary_roc_auc_score(y_true, &scores, sample_weight)
        }
        _ => roc_auc_ovo_weighted(y_true, y_proba, sample_weight),
    }
}

/// ROC-AUC of a score vector for the greater of two labels.
pub fn binary_roc_auc_score(y_true: &[f64], y_score: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    check_lengths(y_true.len(), y_score.len())?;
    let w = weights(y_true.len(), sample_weight)?;
    let labels = sorted_unique(y_true.iter().copied());
    if labels.len() > 2 {
        return Err(MetricError::undefined(
            "multiclass targets need one score column per class",
        ));
    }
    let Some(&positive_label) = labels.last() else {
        return Err(MetricError::Empty);
    };
    let positive: Vec<bool> = y_true.iter().map(|&t| t == positive_label).collect();
    binary_roc_auc(&positive, y_score, &w)
}

fn roc_auc_ovo_weighted(y_true: &[f64], y_proba: &Matrix, sample_weight: Option<&[f64]>) -> MetricResult {
    if sample_weight.is_some() {
        return Err(MetricError::undefined(
            "sample_weight is not supported for multiclass one-vs-one ROC AUC",
        ));
    }
    let classes = sorted_unique(y_true.iter().copied());
    for row in y_proba {
        if row.len() != classes.len() {
            return Err(MetricError::undefined(format!(
                "Number of classes in y_true ({}) not equal to the number of columns in y_score ({})",
                classes.len(),
                row.len()
            )));
        }
        let total: f64 = row.iter().sum();
        if (total - 1.0).abs() > 1e-8 + 1e-5 {
            return Err(MetricError::undefined(
                "Target scores need to be probabilities for multiclass roc_auc",
            ));
        }
    }

    let n = y_true.len() as f64;
    let (mut weighted_sum, mut prevalence_sum) = (0.0, 0.0);
    for a in 0..classes.len() {
        for b in (a + 1)..classes.len() {
            let pair: Vec<usize> = (0..y_true.len())
                .filter(|&i| y_true[i] == classes[a] || y_true[i] == classes[b])
                .collect();
            let unit = vec![1.0; pair.len()];
            let a_true: Vec<bool> = pair.iter().map(|&i| y_true[i] == classes[a]).collect();
            let b_true: Vec<bool> = a_true.iter().map(|t| !t).collect();
            let a_scores: Vec<f64> = pair.iter().map(|&i| y_proba[i][a]).collect();
            let b_scores: Vec<f64> = pair.iter().map(|&i| y_proba[i][b]).collect();

            let score = (binary_roc_auc(&a_true, &a_scores, &unit)?
                + binary_roc_auc(&b_true, &b_scores, &unit)?)
                / 2.0;
            let prevalence = pair.len() as f64 / n;
            weighted_sum += score * prevalence;
            prevalence_sum += prevalence;
        }
    }
    if prevalence_sum == 0.0 {
        return Err(MetricError::undefined("no class pairs"));
    }
    Ok(weighted_sum / prevalence_sum)
}

pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    check_lengths(y_true.len(), y_pred.len())?;
    let w = weights(y_true.len(), sample_weight)?;
    weighted_mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)), &w)
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    check_lengths(y_true.len(), y_pred.len())?;
    let w = weights(y_true.len(), sample_weight)?;
    weighted_mean(y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()), &w)
}

/// Coefficient of determination.
///
/// A constant `y_true` scores 1.0 for a perfect fit and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64], sample_weight: Option<&[f64]>) -> MetricResult {
    check_lengths(y_true.len(), y_pred.len())?;
    if y_true.len() < 2 {
        return Err(MetricError::undefined(
            "R^2 score is not well-defined with less than two samples",
        ));
    }
    let w = weights(y_true.len(), sample_weight)?;
    let mean = weighted_mean(y_true.iter().copied(), &w)?;

    let numerator: f64 = y_true
        .iter()
        .zip(y_pred)
        .zip(&w)
        .map(|((t, p), w)| w * (t - p).powi(2))
        .sum();
    let denominator: f64 = y_true
        .iter()
        .zip(&w)
        .map(|(t, w)| w * (t - mean).powi(2))
        .sum();

    if denominator == 0.0 {
        return Ok(if numerator == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - numerator / denominator)
}
