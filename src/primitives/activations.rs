//! Activation Functions
//!
//! Gate and stack nonlinearities used by the recurrent graph cells.

use crate::{Result, TrendGraphError};
use candle_core::Tensor;

/// Sigmoid activation: σ(x) = 1 / (1 + e^(-x))
///
/// Maps any real number to (0, 1). Used for the update/reset gates and for
/// squashing the T-GCN spatial signal before it enters the gates.
pub fn sigmoid(tensor: &Tensor) -> Result<Tensor> {
    let exp_neg = tensor
        .neg()
        .and_then(|t| t.exp())
        .map_err(|e| TrendGraphError::Tensor(format!("sigmoid exp failed: {}", e)))?;
    (exp_neg + 1.0)
        .and_then(|t| t.recip())
        .map_err(|e| TrendGraphError::Tensor(format!("sigmoid recip failed: {}", e)))
}

/// Softmax along a dimension
pub fn softmax(tensor: &Tensor, dim: usize) -> Result<Tensor> {
    candle_nn::ops::softmax(tensor, dim)
        .map_err(|e| TrendGraphError::Tensor(format!("softmax over dim {} failed: {}", dim, e)))
}

/// ReLU activation: max(0, x)
pub fn relu(tensor: &Tensor) -> Result<Tensor> {
    tensor
        .relu()
        .map_err(|e| TrendGraphError::Tensor(format!("relu failed: {}", e)))
}

/// Leaky ReLU: x if x > 0 else slope * x
///
/// GAT edge scores use a slope of 0.2.
pub fn leaky_relu(tensor: &Tensor, negative_slope: f64) -> Result<Tensor> {
    let zeros = Tensor::zeros_like(tensor)
        .map_err(|e| TrendGraphError::Tensor(format!("leaky_relu zeros failed: {}", e)))?;
    let positive = tensor
        .maximum(&zeros)
        .map_err(|e| TrendGraphError::Tensor(format!("leaky_relu maximum failed: {}", e)))?;
    let negative = tensor
        .minimum(&zeros)
        .and_then(|t| t.affine(negative_slope, 0.0))
        .map_err(|e| TrendGraphError::Tensor(format!("leaky_relu scale failed: {}", e)))?;
    (positive + negative)
        .map_err(|e| TrendGraphError::Tensor(format!("leaky_relu add failed: {}", e)))
}

/// Tanh activation, maps to (-1, 1). Used for the candidate state.
pub fn tanh(tensor: &Tensor) -> Result<Tensor> {
    tensor
        .tanh()
        .map_err(|e| TrendGraphError::Tensor(format!("tanh failed: {}", e)))
}
