//! Model configuration
//!
//! Everything a [`super::TrendModel`] needs at construction, loadable from
//! JSON:
//!
//! ```json
//! {
//!   "architecture": "a3tgcn",
//!   "in_channels": 2,
//!   "out_channels": 1,
//!   "hidden_size": 32,
//!   "layers_nb": 2,
//!   "use_gat": true,
//!   "output_activation": "sigmoid",
//!   "seed": 7
//! }
//! ```
//!
//! `layers_nb` below 1 is clamped to 1 (see [`ModelConfig::effective_layers`]).
//! Every other invalid size is rejected by [`ModelConfig::validate`].

use super::readout::OutputActivation;
use crate::conv::ConvKind;
use crate::{Result, TrendGraphError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Which top-level model to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// T-GCN cells, last hidden state → readout
    #[default]
    Tgcn,
    /// T-GCN cells, attention-pooled history → readout
    A3tgcn,
    /// DCGRU cells, last hidden state → readout
    Dcgnn,
}

impl std::fmt::Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tgcn => write!(f, "tgcn"),
            Self::A3tgcn => write!(f, "a3tgcn"),
            Self::Dcgnn => write!(f, "dcgnn"),
        }
    }
}

fn default_out_channels() -> usize {
    1
}

fn default_hidden_size() -> usize {
    32
}

fn default_layers() -> usize {
    1
}

fn default_conv_layer_sizes() -> Vec<usize> {
    vec![32, 32]
}

/// Construction-time configuration of a [`super::TrendModel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub architecture: Architecture,

    /// Raw feature channels per node and timestep
    pub in_channels: usize,

    /// Scores per node (1 for binary trend)
    #[serde(default = "default_out_channels")]
    pub out_channels: usize,

    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,

    /// Stacked recurrent layers; values below 1 are clamped to 1
    #[serde(default = "default_layers")]
    pub layers_nb: usize,

    #[serde(default)]
    pub output_activation: OutputActivation,

    /// Attention-weighted (GAT) instead of plain (GCN) convolutions
    #[serde(default)]
    pub use_gat: bool,

    /// Widths of the graph convolution stack inside every cell; the last
    /// width is replaced by `hidden_size`
    #[serde(default = "default_conv_layer_sizes")]
    pub conv_layer_sizes: Vec<usize>,

    /// Seed for reproducible parameter initialization
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ModelConfig {
    pub fn new(in_channels: usize, out_channels: usize, hidden_size: usize) -> Self {
        Self {
            architecture: Architecture::default(),
            in_channels,
            out_channels,
            hidden_size,
            layers_nb: default_layers(),
            output_activation: OutputActivation::default(),
            use_gat: false,
            conv_layer_sizes: default_conv_layer_sizes(),
            seed: None,
        }
    }

    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = architecture;
        self
    }

    pub fn with_layers(mut self, layers_nb: usize) -> Self {
        self.layers_nb = layers_nb;
        self
    }

    pub fn with_gat(mut self, use_gat: bool) -> Self {
        self.use_gat = use_gat;
        self
    }

    pub fn with_output_activation(mut self, activation: OutputActivation) -> Self {
        self.output_activation = activation;
        self
    }

    pub fn with_conv_layers(mut self, sizes: Vec<usize>) -> Self {
        self.conv_layer_sizes = sizes;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of recurrent layers actually built (`layers_nb` clamped to ≥ 1)
    pub fn effective_layers(&self) -> usize {
        self.layers_nb.max(1)
    }

    pub fn conv_kind(&self) -> ConvKind {
        ConvKind::from_use_gat(self.use_gat)
    }

    /// Reject sizes that cannot be clamped
    pub fn validate(&self) -> Result<()> {
        if self.in_channels == 0 {
            return Err(TrendGraphError::Config("in_channels must be non-zero".into()));
        }
        if self.out_channels == 0 {
            return Err(TrendGraphError::Config("out_channels must be non-zero".into()));
        }
        if self.hidden_size == 0 {
            return Err(TrendGraphError::Config("hidden_size must be non-zero".into()));
        }
        if self.conv_layer_sizes.is_empty() {
            return Err(TrendGraphError::Config(
                "conv_layer_sizes needs at least one layer".into(),
            ));
        }
        if self.conv_layer_sizes.contains(&0) {
            return Err(TrendGraphError::Config(format!(
                "conv_layer_sizes must be non-zero, got {:?}",
                self.conv_layer_sizes
            )));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrendGraphError::Config(format!("invalid model config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TrendGraphError::Serialization(format!("config to JSON failed: {}", e)))
    }

    /// SHA-256 over the architecture-defining fields
    ///
    /// `layers_nb` enters after clamping and `seed` is left out, so two
    /// configs that build identically shaped models share a hash.
    pub fn config_hash(&self) -> String {
        let canonical = serde_json::json!({
            "architecture": self.architecture.to_string(),
            "in_channels": self.in_channels,
            "out_channels": self.out_channels,
            "hidden_size": self.hidden_size,
            "layers_nb": self.effective_layers(),
            "output_activation": self.output_activation.to_string(),
            "use_gat": self.use_gat,
            "conv_layer_sizes": self.conv_layer_sizes,
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
