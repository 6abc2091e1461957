//! Temporal attention pooling over a hidden-state history

use super::unroller::HiddenHistory;
use crate::primitives::softmax;
use crate::{Result, TrendGraphError};
use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};

/// Result of pooling: per-node summary plus the weights that produced it
#[derive(Debug, Clone)]
pub struct PooledHistory {
    /// `[N, hidden_size]`
    pub pooled: Tensor,
    /// `[N, T, 1]`, non-negative and summing to 1 over `T` for every node
    pub weights: Tensor,
}

/// Scores every timestep's hidden state with a learned projection, softmaxes
/// the scores over time and returns the weighted sum.
///
/// ```text
/// s_t = w · h_t + b        per node
/// α   = softmax_t(s)
/// out = Σ_t α_t h_t
/// ```
#[derive(Debug)]
pub struct TemporalAttentionPool {
    score: Linear,
    hidden_size: usize,
}

impl TemporalAttentionPool {
    pub fn new(hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        let score = candle_nn::linear(hidden_size, 1, vb.pp("score"))
            .map_err(|e| TrendGraphError::Tensor(format!("attention init failed: {}", e)))?;
        Ok(Self { score, hidden_size })
    }

    /// Attention weights for a stacked history `[N, T, H]` → `[N, T, 1]`
    pub fn weights(&self, stacked: &Tensor) -> Result<Tensor> {
        match stacked.dims3() {
            Ok((_, t, h)) if t > 0 && h == self.hidden_size => {}
            _ => {
                return Err(TrendGraphError::ShapeMismatch(format!(
                    "attention expects [N, T>0, {}], got {:?}",
                    self.hidden_size,
                    stacked.dims()
                )))
            }
        }

        let scores = self
            .score
            .forward(stacked)
            .map_err(|e| TrendGraphError::Tensor(format!("attention scoring failed: {}", e)))?;
        softmax(&scores, 1)
    }

    pub fn pool(&self, history: &HiddenHistory) -> Result<PooledHistory> {
        let stacked = history.stack()?;
        let weights = self.weights(&stacked)?;

        let pooled = stacked
            .broadcast_mul(&weights)
            .and_then(|weighted| weighted.sum(1))
            .map_err(|e| TrendGraphError::Tensor(format!("attention pooling failed: {}", e)))?;

        Ok(PooledHistory { pooled, weights })
    }
}
