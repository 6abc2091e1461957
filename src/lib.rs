//! # trendgraph
//!
//! Spatio-temporal graph-recurrent networks for short-horizon up/down trend
//! prediction over a basket of stocks.
//!
//! ## Overview
//!
//! Each sample is a window of `T` timesteps of per-stock features plus a static
//! graph of inter-stock relationships. A stack of recurrent graph cells is
//! unrolled over the window; every cell fuses a graph convolution with a
//! gated-recurrent-unit update. The final (or attention-pooled) hidden state is
//! projected to one score per stock.
//!
//! Core pieces:
//!
//! - **Graph**: validated edge list + edge weights, densified once per pass
//! - **Conv**: GCN and GAT operators behind one [`conv::GraphConv`] trait
//! - **Cells**: fused-gate T-GCN and split-gate DCGRU state transitions
//! - **Model**: sequence unrolling, temporal attention pooling, readout
//! - **Params**: named parameter store with safetensors checkpoints
//! - **Training**: losses, clipped optimizer steps, confusion-matrix metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trendgraph::prelude::*;
//!
//! let device = best_device();
//! let config = ModelConfig::new(2, 1, 32)
//!     .with_architecture(Architecture::A3tgcn)
//!     .with_layers(2)
//!     .with_gat(true)
//!     .with_seed(7);
//!
//! let model = TrendModel::new(config, &device)?;
//! let graph = GraphSnapshot::ring(10, true);
//! let x = Tensor::randn(0f32, 1.0, (10, 2, 5), &device)?; // [nodes, features, window]
//!
//! let scores = model.forward(&x, &graph)?; // [10, 1]
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod primitives;
pub mod graph;
pub mod conv;
pub mod cell;
pub mod model;
pub mod params;
pub mod training;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for graph-recurrent model operations
#[derive(Debug, thiserror::Error)]
pub enum TrendGraphError {
    /// Feature width, hidden width, node count or edge indices disagree with
    /// the configured model or graph.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for graph-recurrent model operations
pub type Result<T> = std::result::Result<T, TrendGraphError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{Result, TrendGraphError};

    // Primitives
    pub use crate::primitives::{
        best_device, cpu_device, gpu_disabled,
        sigmoid, softmax, relu, tanh,
        binary_cross_entropy, binary_cross_entropy_with_logits, mse_loss,
    };

    // Graph + operators
    pub use crate::graph::{DenseGraph, GraphSnapshot};
    pub use crate::conv::{ConvKind, GraphConv, GraphConvStack};
    pub use crate::cell::{DcgruCell, RecurrentGraphCell, TgcnCell};

    // Models
    pub use crate::model::{
        Architecture, ModelConfig, ModelOutput, OutputActivation, TrendModel,
    };

    // Parameters
    pub use crate::params::{CheckpointMetadata, ParamStore};

    // Training utilities
    pub use crate::training::{
        ConfusionMatrix, Trainer, TrainingConfig, TrendSample,
        check_gradients_health, compute_grad_norm,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let device = cpu_device();
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn test_shape_error_display() {
        let err = crate::TrendGraphError::ShapeMismatch("expected 3 features, got 2".into());
        assert_eq!(err.to_string(), "Shape mismatch: expected 3 features, got 2");
    }
}
