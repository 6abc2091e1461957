//! Training Infrastructure
//!
//! The pieces a training loop composes around a [`TrendModel`]:
//!
//! - **Samples**: [`TrendSample`] bundles a feature window, its graph and
//!   optional up/down labels
//! - **Optimization**: AdamW with gradient-norm clipping and NaN guards
//! - **Metrics**: loss tracking ([`MetricsTracker`]) and binary trend
//!   metrics ([`ConfusionMatrix`])
//!
//! ## Example
//!
//! ```ignore
//! use trendgraph::prelude::*;
//!
//! let model = TrendModel::new(config, &device)?;
//! let mut trainer = Trainer::new(&model, TrainingConfig::default())?;
//!
//! let tracker = trainer.fit(&train_samples)?;
//! let matrix = trainer.evaluate(&test_samples)?;
//! println!("{}", matrix);
//! ```

mod metrics;

pub use metrics::{ConfusionMatrix, MetricsTracker};

use crate::graph::GraphSnapshot;
use crate::model::{OutputActivation, TrendModel};
use crate::primitives::{binary_cross_entropy, binary_cross_entropy_with_logits, mse_loss, sigmoid};
use crate::{Result, TrendGraphError};
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::optim::{AdamW, Optimizer as CandleOptimizer, ParamsAdamW};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_grad_clip() -> f32 {
    1.0
}

fn default_threshold() -> f32 {
    0.5
}

fn default_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    8
}

/// Optimizer and loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default)]
    pub weight_decay: f64,

    /// Maximum global gradient L2 norm
    #[serde(default = "default_grad_clip")]
    pub grad_clip: f32,

    /// Probability at or above which a node is called "up"
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Samples averaged into one optimizer step
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Stop after this many epochs without a new best loss
    #[serde(default)]
    pub patience: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            weight_decay: 0.0,
            grad_clip: default_grad_clip(),
            threshold: default_threshold(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            patience: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0) {
            return Err(TrendGraphError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.grad_clip > 0.0) {
            return Err(TrendGraphError::Config(format!(
                "grad_clip must be positive, got {}",
                self.grad_clip
            )));
        }
        if self.batch_size == 0 {
            return Err(TrendGraphError::Config("batch_size must be non-zero".into()));
        }
        Ok(())
    }
}

/// One training or evaluation example
#[derive(Debug, Clone)]
pub struct TrendSample {
    /// `[N, F, T]`
    pub features: Tensor,
    pub graph: GraphSnapshot,
    /// `[N, out_channels]` with values in {0, 1}
    pub label: Option<Tensor>,
}

impl TrendSample {
    pub fn new(features: Tensor, graph: GraphSnapshot, label: Option<Tensor>) -> Result<Self> {
        let (n, _, _) = features.dims3().map_err(|_| {
            TrendGraphError::ShapeMismatch(format!(
                "sample features must be [N, F, T], got {:?}",
                features.dims()
            ))
        })?;
        if n != graph.num_nodes() {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "sample has {} nodes but graph has {}",
                n,
                graph.num_nodes()
            )));
        }
        if let Some(label) = &label {
            match label.dims2() {
                Ok((ln, _)) if ln == n => {}
                _ => {
                    return Err(TrendGraphError::ShapeMismatch(format!(
                        "label must be [{}, out_channels], got {:?}",
                        n,
                        label.dims()
                    )))
                }
            }
        }
        Ok(Self {
            features,
            graph,
            label,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }
}

/// Loss applied between model output and label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Output is a probability
    BinaryCrossEntropy,
    /// Output is a raw score
    BinaryCrossEntropyWithLogits,
    MeanSquaredError,
}

impl LossKind {
    pub fn for_activation(activation: OutputActivation) -> Self {
        match activation {
            OutputActivation::Sigmoid => Self::BinaryCrossEntropy,
            _ => Self::BinaryCrossEntropyWithLogits,
        }
    }

    pub fn compute(&self, output: &Tensor, label: &Tensor) -> Result<Tensor> {
        if output.dims() != label.dims() {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "output {:?} and label {:?} differ",
                output.dims(),
                label.dims()
            )));
        }
        match self {
            Self::BinaryCrossEntropy => binary_cross_entropy(output, label),
            Self::BinaryCrossEntropyWithLogits => binary_cross_entropy_with_logits(output, label),
            Self::MeanSquaredError => mse_loss(output, label),
        }
    }
}

/// Result of one optimizer step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    pub loss: f32,

    pub samples: usize,

    /// Global gradient L2 norm before clipping
    pub grad_norm: f32,

    pub clipped: bool,

    pub step: usize,
}

/// Optimizer state bound to one model
///
/// The optimizer updates the model's variables in place; the model itself
/// stays shared.
pub struct Trainer<'m> {
    model: &'m TrendModel,
    optimizer: AdamW,
    vars: Vec<Var>,
    config: TrainingConfig,
    loss: LossKind,
    step: usize,
}

impl<'m> Trainer<'m> {
    pub fn new(model: &'m TrendModel, config: TrainingConfig) -> Result<Self> {
        config.validate()?;

        let vars = model.trainable_vars()?;
        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = <AdamW as CandleOptimizer>::new(vars.clone(), params)
            .map_err(|e| TrendGraphError::Tensor(format!("AdamW init failed: {}", e)))?;

        Ok(Self {
            loss: LossKind::for_activation(model.config().output_activation),
            model,
            optimizer,
            vars,
            config,
            step: 0,
        })
    }

    pub fn with_loss(mut self, loss: LossKind) -> Self {
        self.loss = loss;
        self
    }

    pub fn loss_kind(&self) -> LossKind {
        self.loss
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn steps_taken(&self) -> usize {
        self.step
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.optimizer.set_learning_rate(lr)
    }

    fn sample_loss(&self, sample: &TrendSample) -> Result<Tensor> {
        let label = sample.label.as_ref().ok_or_else(|| {
            TrendGraphError::Training("cannot train on a sample without a label".into())
        })?;
        let output = self.model.forward(&sample.features, &sample.graph)?;
        self.loss.compute(&output, label)
    }

    /// One optimizer step on a single labelled sample
    pub fn train_step(&mut self, sample: &TrendSample) -> Result<TrainingResult> {
        self.train_batch(std::slice::from_ref(sample))
    }

    /// One optimizer step on the mean loss of several labelled samples
    pub fn train_batch(&mut self, samples: &[TrendSample]) -> Result<TrainingResult> {
        if samples.is_empty() {
            return Err(TrendGraphError::Training("empty training batch".into()));
        }

        let losses = samples
            .iter()
            .map(|s| self.sample_loss(s))
            .collect::<Result<Vec<_>>>()?;
        let loss = Tensor::stack(&losses, 0)?.mean_all()?;

        let loss_value = loss.to_scalar::<f32>()?;
        if !loss_value.is_finite() {
            return Err(TrendGraphError::Training(format!(
                "non-finite loss {} at step {}",
                loss_value, self.step
            )));
        }

        let mut grads = loss.backward()?;
        let grad_norm = safe_optimizer_step(
            &mut self.optimizer,
            &mut grads,
            &self.vars,
            self.config.grad_clip,
        )?;

        let result = TrainingResult {
            loss: loss_value,
            samples: samples.len(),
            grad_norm,
            clipped: grad_norm > self.config.grad_clip,
            step: self.step,
        };
        self.step += 1;

        debug!(
            step = result.step,
            loss = result.loss,
            grad_norm = result.grad_norm,
            clipped = result.clipped,
            "training step"
        );
        Ok(result)
    }

    /// Run `epochs` passes over `samples` in fixed order
    ///
    /// Records one mean loss per epoch and stops early once `patience`
    /// epochs pass without improvement.
    pub fn fit(&mut self, samples: &[TrendSample]) -> Result<MetricsTracker> {
        if samples.is_empty() {
            return Err(TrendGraphError::Training("no training samples".into()));
        }

        let mut tracker = MetricsTracker::new();
        for epoch in 0..self.config.epochs {
            let mut total = 0.0f32;
            let mut batches = 0usize;
            for batch in samples.chunks(self.config.batch_size) {
                total += self.train_batch(batch)?.loss;
                batches += 1;
            }
            let epoch_loss = total / batches as f32;
            tracker.record_loss(epoch_loss);

            info!(epoch, loss = epoch_loss, best = ?tracker.best_loss(), "epoch finished");

            if let Some(patience) = self.config.patience {
                if tracker.has_converged(patience) {
                    info!(epoch, patience, "no improvement, stopping early");
                    break;
                }
            }
        }
        Ok(tracker)
    }

    /// Per-node "up" probabilities `[N, out_channels]`
    pub fn predict_proba(&self, features: &Tensor, graph: &GraphSnapshot) -> Result<Tensor> {
        let output = self.model.forward(features, graph)?;
        match self.loss {
            LossKind::BinaryCrossEntropyWithLogits => sigmoid(&output),
            _ => Ok(output),
        }
    }

    /// Confusion matrix over every labelled node of every sample
    ///
    /// Fails with [`TrendGraphError::Training`] when the model emits NaN/Inf.
    pub fn evaluate(&self, samples: &[TrendSample]) -> Result<ConfusionMatrix> {
        let mut matrix = ConfusionMatrix::new();
        for sample in samples {
            let Some(label) = &sample.label else {
                debug!("skipping unlabelled sample in evaluation");
                continue;
            };
            let probs = self
                .predict_proba(&sample.features, &sample.graph)?
                .flatten_all()?
                .to_vec1::<f32>()?;
            let labels = label.flatten_all()?.to_vec1::<f32>()?;
            if probs.len() != labels.len() {
                return Err(TrendGraphError::ShapeMismatch(format!(
                    "{} predictions for {} labels",
                    probs.len(),
                    labels.len()
                )));
            }
            matrix.merge(&ConfusionMatrix::from_predictions(
                &probs,
                &labels,
                self.config.threshold,
            ));
        }
        if matrix.non_finite > 0 {
            return Err(TrendGraphError::Training(format!(
                "{} non-finite predictions during evaluation",
                matrix.non_finite
            )));
        }
        Ok(matrix)
    }
}

// =============================================================================
// Gradient Utilities
// =============================================================================

/// Clipped optimizer step
///
/// Refuses to step when any gradient holds NaN/Inf. When the global norm
/// exceeds `max_grad_norm` every gradient is rescaled by
/// `max_grad_norm / norm` before the optimizer sees it.
///
/// Returns the norm measured before clipping.
pub fn safe_optimizer_step<O: CandleOptimizer>(
    optimizer: &mut O,
    grads: &mut GradStore,
    vars: &[Var],
    max_grad_norm: f32,
) -> Result<f32> {
    if !check_gradients_health(grads, vars) {
        warn!("NaN/Inf in gradients, skipping optimizer step");
        return Err(TrendGraphError::Training(
            "NaN detected in gradients - skipping step".into(),
        ));
    }

    let total_norm = compute_grad_norm(grads, vars)?;

    if total_norm > max_grad_norm && total_norm > 0.0 {
        let scale = (max_grad_norm / total_norm) as f64;
        for var in vars {
            if let Some(grad) = grads.remove(var.as_tensor()) {
                let scaled = grad
                    .affine(scale, 0.0)
                    .map_err(|e| TrendGraphError::Tensor(format!("grad scale failed: {}", e)))?;
                grads.insert(var.as_tensor(), scaled);
            }
        }
    }

    optimizer
        .step(grads)
        .map_err(|e| TrendGraphError::Training(format!("optimizer step failed: {}", e)))?;
    Ok(total_norm)
}

/// Global L2 norm over every variable's gradient
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;

    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total_sq_norm += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }

    Ok(total_sq_norm.sqrt())
}

/// `true` when no gradient contains NaN or Inf
pub fn check_gradients_health(grads: &GradStore, vars: &[Var]) -> bool {
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            if let Ok(vals) = grad.flatten_all().and_then(|t| t.to_vec1::<f32>()) {
                if vals.iter().any(|v| !v.is_finite()) {
                    return false;
                }
            }
        }
    }
    true
}
