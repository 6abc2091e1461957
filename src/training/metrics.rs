//! Loss tracking and binary trend metrics

use serde::{Deserialize, Serialize};
use std::fmt;

use super::TrainingResult;

/// Loss history with best-loss and plateau tracking
#[derive(Debug, Default, Clone)]
pub struct MetricsTracker {
    losses: Vec<f32>,
    best_loss: Option<f32>,
    steps_since_improvement: usize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &TrainingResult) {
        self.record_loss(result.loss);
    }

    pub fn record_loss(&mut self, loss: f32) {
        self.losses.push(loss);

        match self.best_loss {
            Some(best) if loss >= best => self.steps_since_improvement += 1,
            _ => {
                self.best_loss = Some(loss);
                self.steps_since_improvement = 0;
            }
        }
    }

    /// Mean of the last `n` recorded losses
    pub fn average_loss(&self, n: usize) -> Option<f32> {
        if self.losses.is_empty() || n == 0 {
            return None;
        }

        let start = self.losses.len().saturating_sub(n);
        let slice = &self.losses[start..];
        Some(slice.iter().sum::<f32>() / slice.len() as f32)
    }

    /// No improvement for `patience` records
    pub fn has_converged(&self, patience: usize) -> bool {
        self.steps_since_improvement >= patience
    }

    pub fn best_loss(&self) -> Option<f32> {
        self.best_loss
    }

    pub fn last_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }

    pub fn total_steps(&self) -> usize {
        self.losses.len()
    }

    #[cfg(test)]
    fn losses(&self) -> &[f32] {
        &self.losses
    }
}

/// 2×2 confusion matrix for up (positive) / down (negative) trend calls
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    /// NaN/Inf predictions, kept out of the four cells
    #[serde(default)]
    pub non_finite: usize,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, predicted_up: bool, actual_up: bool) {
        match (predicted_up, actual_up) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    /// Count probabilities against {0, 1} labels
    ///
    /// A prediction is "up" at `prob >= threshold`, a label at `>= 0.5`.
    /// Non-finite probabilities go to [`Self::non_finite`] instead of a cell.
    pub fn from_predictions(probs: &[f32], labels: &[f32], threshold: f32) -> Self {
        let mut matrix = Self::new();
        for (p, y) in probs.iter().zip(labels.iter()) {
            if p.is_finite() {
                matrix.record(*p >= threshold, *y >= 0.5);
            } else {
                matrix.non_finite += 1;
            }
        }
        matrix
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.true_negatives += other.true_negatives;
        self.false_negatives += other.false_negatives;
        self.non_finite += other.non_finite;
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positives + self.true_negatives, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    /// Matthews correlation coefficient, 0 when any marginal is empty
    pub fn mcc(&self) -> f64 {
        let tp = self.true_positives as f64;
        let fp = self.false_positives as f64;
        let tn = self.true_negatives as f64;
        let fn_ = self.false_negatives as f64;

        let denom = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();
        if denom == 0.0 {
            0.0
        } else {
            (tp * tn - fp * fn_) / denom
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "             pred up  pred down")?;
        writeln!(
            f,
            "actual up    {:>7}  {:>9}",
            self.true_positives, self.false_negatives
        )?;
        writeln!(
            f,
            "actual down  {:>7}  {:>9}",
            self.false_positives, self.true_negatives
        )?;
        if self.non_finite > 0 {
            writeln!(f, "non-finite   {:>7}", self.non_finite)?;
        }
        write!(
            f,
            "accuracy {:.3}  precision {:.3}  recall {:.3}  f1 {:.3}  mcc {:.3}",
            self.accuracy(),
            self.precision(),
            self.recall(),
            self.f1(),
            self.mcc()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(loss: f32, step: usize) -> TrainingResult {
        TrainingResult {
            loss,
            samples: 4,
            grad_norm: 0.0,
            clipped: false,
            step,
        }
    }

    #[test]
    fn test_metrics_tracker() {
        let mut tracker = MetricsTracker::new();
        tracker.record(&result(1.0, 0));
        tracker.record(&result(0.5, 1));

        assert_eq!(tracker.best_loss(), Some(0.5));
        assert_eq!(tracker.last_loss(), Some(0.5));
        assert_eq!(tracker.total_steps(), 2);
        assert_eq!(tracker.losses(), &[1.0, 0.5]);
        assert!((tracker.average_loss(2).unwrap() - 0.75).abs() < 0.001);
        assert_eq!(tracker.average_loss(0), None);
    }

    #[test]
    fn test_convergence_detection() {
        let mut tracker = MetricsTracker::new();
        for i in 0..5 {
            tracker.record(&result(1.0 - i as f32 * 0.1, i));
        }
        assert!(!tracker.has_converged(3));

        // plateau
        for i in 5..10 {
            tracker.record(&result(0.7, i));
        }
        assert!(tracker.has_converged(3));
    }

    #[test]
    fn test_confusion_matrix_metrics() {
        let probs = [0.9, 0.8, 0.3, 0.6, 0.1, 0.2];
        let labels = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let m = ConfusionMatrix::from_predictions(&probs, &labels, 0.5);

        assert_eq!(m.true_positives, 2);
        assert_eq!(m.false_negatives, 1);
        assert_eq!(m.false_positives, 1);
        assert_eq!(m.true_negatives, 2);
        assert_eq!(m.total(), 6);
        assert!((m.accuracy() - 4.0 / 6.0).abs() < 1e-9);
        assert!((m.precision() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.recall() - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.f1() - 2.0 / 3.0).abs() < 1e-9);
        // (2*2 - 1*1) / sqrt(3*3*3*3)
        assert!((m.mcc() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_matrix_is_zero_not_nan() {
        let mut m = ConfusionMatrix::new();
        for _ in 0..4 {
            m.record(false, false);
        }
        assert_eq!(m.accuracy(), 1.0);
        assert_eq!(m.precision(), 0.0);
        assert_eq!(m.recall(), 0.0);
        assert_eq!(m.f1(), 0.0);
        assert_eq!(m.mcc(), 0.0);
        assert_eq!(ConfusionMatrix::new().accuracy(), 0.0);
    }

    #[test]
    fn test_merge_and_display() {
        let mut a = ConfusionMatrix::from_predictions(&[0.7], &[1.0], 0.5);
        let b = ConfusionMatrix::from_predictions(&[0.7, 0.2], &[0.0, 0.0], 0.5);
        a.merge(&b);
        assert_eq!(a.total(), 3);

        let rendered = a.to_string();
        assert!(rendered.contains("pred up"));
        assert!(rendered.contains("actual down"));
        assert!(rendered.contains("mcc"));
        assert!(!rendered.contains("non-finite"));
    }

    #[test]
    fn test_non_finite_predictions_are_counted_apart() {
        let m = ConfusionMatrix::from_predictions(&[f32::NAN, f32::NAN, 0.9], &[1.0, 0.0, 1.0], 0.5);
        assert_eq!(m.non_finite, 2);
        assert_eq!(m.true_positives, 1);
        assert_eq!(m.true_negatives, 0);
        assert_eq!(m.false_negatives, 0);
        assert_eq!(m.total(), 1);

        let mut merged = ConfusionMatrix::new();
        merged.merge(&m);
        assert_eq!(merged.non_finite, 2);
        assert!(merged.to_string().contains("non-finite         2"));
    }
}
