//! Core Tensor Operations
//!
//! Device selection and the loss functions a trainer plugs onto the model's
//! readout.
//!
//! ## Forcing CPU
//!
//! ```bash
//! export TRENDGRAPH_NO_GPU=1
//! ```
//!
//! The forward pass is a strictly sequential timestep loop, so small baskets
//! (around 100 nodes) are usually no faster on a GPU.

use crate::{Result, TrendGraphError};
use candle_core::{Device, Tensor};
use tracing::info;

// ============================================================================
// Environment-controlled Device Selection
// ============================================================================

/// Check if GPU is disabled via environment variable.
///
/// Set `TRENDGRAPH_NO_GPU=1` to force CPU-only mode.
pub fn gpu_disabled() -> bool {
    std::env::var("TRENDGRAPH_NO_GPU")
        .map(|v| !v.is_empty() && v != "0" && v.to_lowercase() != "false")
        .unwrap_or(false)
}

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. `TRENDGRAPH_NO_GPU` env var (forces CPU if set)
/// 2. Metal (Apple Silicon)
/// 3. CUDA (NVIDIA GPUs)
/// 4. CPU (fallback)
pub fn best_device() -> Device {
    if gpu_disabled() {
        info!("Using CPU device (TRENDGRAPH_NO_GPU set)");
        return Device::Cpu;
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

/// Force CPU device, ignoring GPU availability.
pub fn cpu_device() -> Device {
    Device::Cpu
}

// ============================================================================
// Losses
// ============================================================================

/// Binary cross-entropy on probabilities
///
/// BCE = -mean[y * log(p) + (1-y) * log(1-p)]
///
/// Use when the readout ends in a sigmoid.
pub fn binary_cross_entropy(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let eps = 1e-7f32;
    let pred_clamped = pred
        .clamp(eps, 1.0 - eps)
        .map_err(|e| TrendGraphError::Tensor(format!("BCE clamp failed: {}", e)))?;
    let log_p = pred_clamped
        .log()
        .map_err(|e| TrendGraphError::Tensor(format!("BCE log failed: {}", e)))?;

    // ones_like keeps the dtype (a bare 1.0 literal would not)
    let ones = Tensor::ones_like(&pred_clamped)
        .map_err(|e| TrendGraphError::Tensor(format!("BCE ones_like failed: {}", e)))?;
    let log_1_p = (&ones - &pred_clamped)
        .and_then(|t| t.log())
        .map_err(|e| TrendGraphError::Tensor(format!("BCE log(1-p) failed: {}", e)))?;

    let term1 = target
        .mul(&log_p)
        .map_err(|e| TrendGraphError::Tensor(format!("BCE term1 failed: {}", e)))?;
    let one_minus_target = (&Tensor::ones_like(target)? - target)
        .map_err(|e| TrendGraphError::Tensor(format!("BCE 1-target failed: {}", e)))?;
    let term2 = one_minus_target
        .mul(&log_1_p)
        .map_err(|e| TrendGraphError::Tensor(format!("BCE term2 failed: {}", e)))?;

    (term1 + term2)
        .and_then(|t| t.neg())
        .and_then(|t| t.mean_all())
        .map_err(|e| TrendGraphError::Tensor(format!("BCE mean failed: {}", e)))
}

/// Binary cross-entropy on raw scores (logits)
///
/// Numerically stable form: mean[max(z, 0) - z * y + log(1 + e^(-|z|))].
/// Use when the readout keeps the identity activation.
pub fn binary_cross_entropy_with_logits(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    let positive = logits
        .relu()
        .map_err(|e| TrendGraphError::Tensor(format!("BCE-logits relu failed: {}", e)))?;
    let zy = logits
        .mul(target)
        .map_err(|e| TrendGraphError::Tensor(format!("BCE-logits z*y failed: {}", e)))?;
    let softplus_tail = logits
        .abs()
        .and_then(|t| t.neg())
        .and_then(|t| t.exp())
        .and_then(|t| t.affine(1.0, 1.0))
        .and_then(|t| t.log())
        .map_err(|e| TrendGraphError::Tensor(format!("BCE-logits log1p failed: {}", e)))?;

    ((positive - zy).and_then(|t| t + softplus_tail))
        .and_then(|t| t.mean_all())
        .map_err(|e| TrendGraphError::Tensor(format!("BCE-logits mean failed: {}", e)))
}

/// Mean squared error loss
pub fn mse_loss(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    (pred - target)
        .and_then(|d| d.sqr())
        .and_then(|d| d.mean_all())
        .map_err(|e| TrendGraphError::Tensor(format!("MSE failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_device() {
        assert!(matches!(cpu_device(), Device::Cpu));
    }

    #[test]
    fn test_best_device() {
        let device = best_device();
        assert!(matches!(
            device,
            Device::Cpu | Device::Metal(_) | Device::Cuda(_)
        ));
    }

    #[test]
    fn test_gpu_disabled_flag() {
        // Depends on the environment; only checks it doesn't panic
        let _disabled = gpu_disabled();
    }

    #[test]
    fn test_mse_loss_zero_for_perfect_prediction() {
        let device = Device::Cpu;
        let pred = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], 3, &device).unwrap();
        let loss = mse_loss(&pred, &pred).unwrap().to_scalar::<f32>().unwrap();
        assert!(loss.abs() < 1e-6);
    }

    #[test]
    fn test_bce_loss() {
        let device = Device::Cpu;
        let pred = Tensor::from_vec(vec![0.9f32], 1, &device).unwrap();
        let target = Tensor::from_vec(vec![1.0f32], 1, &device).unwrap();

        let loss = binary_cross_entropy(&pred, &target).unwrap();
        assert!(loss.to_scalar::<f32>().unwrap() < 0.2);
    }

    #[test]
    fn test_bce_with_logits_matches_bce_on_sigmoid() {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(vec![-2.0f32, -0.5, 0.0, 1.5, 4.0], 5, &device).unwrap();
        let target = Tensor::from_vec(vec![0.0f32, 1.0, 1.0, 0.0, 1.0], 5, &device).unwrap();

        let from_logits = binary_cross_entropy_with_logits(&logits, &target)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        let probs = crate::primitives::sigmoid(&logits).unwrap();
        let from_probs = binary_cross_entropy(&probs, &target)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        assert!((from_logits - from_probs).abs() < 1e-4, "{} vs {}", from_logits, from_probs);
    }

    #[test]
    fn test_bce_with_logits_extreme_scores_are_finite() {
        let device = Device::Cpu;
        let logits = Tensor::from_vec(vec![-80.0f32, 80.0], 2, &device).unwrap();
        let target = Tensor::from_vec(vec![1.0f32, 0.0], 2, &device).unwrap();
        let loss = binary_cross_entropy_with_logits(&logits, &target)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss.is_finite());
        assert!((loss - 80.0).abs() < 1e-3);
    }
}
