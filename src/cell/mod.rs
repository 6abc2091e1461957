//! Recurrent graph cells
//!
//! A cell is one discrete state transition `(x_t, h_{t-1}, graph) → h_t`
//! combining graph convolution with a GRU-style gated update:
//!
//! ```text
//! h_t = u ⊙ h_{t-1} + (1 - u) ⊙ c
//! ```
//!
//! - [`TgcnCell`]: one shared spatial signal feeds linear gates (fused gates)
//! - [`DcgruCell`]: every gate owns its own convolution stack (split gates)

mod dcgru;
mod tgcn;

pub use dcgru::DcgruCell;
pub use tgcn::TgcnCell;

use crate::graph::DenseGraph;
use crate::{Result, TrendGraphError};
use candle_core::Tensor;

/// One recurrent state-transition over a static graph
pub trait RecurrentGraphCell: std::fmt::Debug {
    /// Width of the per-node input features
    fn input_width(&self) -> usize;

    fn hidden_size(&self) -> usize;

    /// `x: [N, input_width]`, `h_prev: [N, hidden_size]` → `[N, hidden_size]`
    fn step(&self, x: &Tensor, h_prev: &Tensor, graph: &DenseGraph) -> Result<Tensor>;
}

/// Intermediate gate values of one cell step
#[derive(Debug, Clone)]
pub struct GateTrace {
    /// Update gate `u`, in [0, 1]
    pub update: Tensor,
    /// Reset gate `r`, in [0, 1]
    pub reset: Tensor,
    /// Candidate state `c`, in [-1, 1]
    pub candidate: Tensor,
    /// New hidden state
    pub hidden: Tensor,
}

pub(crate) fn check_hidden(h_prev: &Tensor, num_nodes: usize, hidden_size: usize) -> Result<()> {
    match h_prev.dims2() {
        Ok((n, h)) if n == num_nodes && h == hidden_size => Ok(()),
        _ => Err(TrendGraphError::ShapeMismatch(format!(
            "hidden state must be [{}, {}], got {:?}",
            num_nodes,
            hidden_size,
            h_prev.dims()
        ))),
    }
}

/// `u ⊙ h_prev + (1 - u) ⊙ c`
pub(crate) fn gated_update(update: &Tensor, h_prev: &Tensor, candidate: &Tensor) -> Result<Tensor> {
    let keep = update
        .mul(h_prev)
        .map_err(|e| TrendGraphError::Tensor(format!("gated update u*h failed: {}", e)))?;
    let fresh = update
        .affine(-1.0, 1.0)
        .and_then(|one_minus_u| one_minus_u.mul(candidate))
        .map_err(|e| TrendGraphError::Tensor(format!("gated update (1-u)*c failed: {}", e)))?;
    (keep + fresh).map_err(|e| TrendGraphError::Tensor(format!("gated update sum failed: {}", e)))
}
