//! Readout head: hidden vector → per-node scores

use crate::primitives::{relu, sigmoid, tanh};
use crate::{Result, TrendGraphError};
use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

/// Nonlinearity applied after the readout projection
///
/// `Identity` hands raw scores to a logits-based loss; `Sigmoid` hands
/// probabilities to a probability-based one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    #[default]
    Identity,
    Sigmoid,
    Tanh,
    Relu,
}

impl OutputActivation {
    pub fn apply(&self, tensor: &Tensor) -> Result<Tensor> {
        match self {
            Self::Identity => Ok(tensor.clone()),
            Self::Sigmoid => sigmoid(tensor),
            Self::Tanh => tanh(tensor),
            Self::Relu => relu(tensor),
        }
    }
}

impl std::fmt::Display for OutputActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Sigmoid => write!(f, "sigmoid"),
            Self::Tanh => write!(f, "tanh"),
            Self::Relu => write!(f, "relu"),
        }
    }
}

/// Linear projection `hidden_size → out_channels` plus an optional activation
#[derive(Debug)]
pub struct ReadoutHead {
    linear: Linear,
    activation: OutputActivation,
    hidden_size: usize,
    out_channels: usize,
}

impl ReadoutHead {
    pub fn new(
        hidden_size: usize,
        out_channels: usize,
        activation: OutputActivation,
        vb: VarBuilder,
    ) -> Result<Self> {
        let linear = candle_nn::linear(hidden_size, out_channels, vb.pp("linear"))
            .map_err(|e| TrendGraphError::Tensor(format!("readout init failed: {}", e)))?;
        Ok(Self {
            linear,
            activation,
            hidden_size,
            out_channels,
        })
    }

    pub fn activation(&self) -> OutputActivation {
        self.activation
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// `[N, hidden_size]` → `[N, out_channels]`
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        match hidden.dims2() {
            Ok((_, h)) if h == self.hidden_size => {}
            _ => {
                return Err(TrendGraphError::ShapeMismatch(format!(
                    "readout expects [N, {}], got {:?}",
                    self.hidden_size,
                    hidden.dims()
                )))
            }
        }

        let scores = self
            .linear
            .forward(hidden)
            .map_err(|e| TrendGraphError::Tensor(format!("readout projection failed: {}", e)))?;
        self.activation.apply(&scores)
    }
}
