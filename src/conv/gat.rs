//! GAT operator (Veličković et al. 2018), single head

use super::{check_node_features, GraphConv};
use crate::graph::DenseGraph;
use crate::primitives::gnn::gat_aggregate;
use crate::{Result, TrendGraphError};
use candle_core::Tensor;
use candle_nn::{Init, Linear, Module, VarBuilder};

/// Attention-weighted graph convolution
///
/// Attention coefficients are recomputed on every call from the current
/// features of both edge endpoints, then scaled by the static edge weight.
/// Split source/target attention vectors avoid materializing the
/// `[N, N, 2F]` pair tensor.
#[derive(Debug)]
pub struct GatConv {
    lin: Linear,
    att_src: Tensor,
    att_dst: Tensor,
    bias: Tensor,
    in_width: usize,
    out_width: usize,
}

impl GatConv {
    /// Parameters: `lin.weight [out, in]`, `att_src [out]`, `att_dst [out]`, `bias [out]`
    pub fn new(in_width: usize, out_width: usize, vb: VarBuilder) -> Result<Self> {
        let lin = candle_nn::linear_no_bias(in_width, out_width, vb.pp("lin"))
            .map_err(|e| TrendGraphError::Tensor(format!("gat lin init failed: {}", e)))?;

        // Glorot-scale normal init for the attention vectors
        let stdev = (2.0 / (out_width as f64 + 1.0)).sqrt();
        let att_init = Init::Randn { mean: 0.0, stdev };
        let att_src = vb
            .get_with_hints(out_width, "att_src", att_init)
            .map_err(|e| TrendGraphError::Tensor(format!("gat att_src init failed: {}", e)))?;
        let att_dst = vb
            .get_with_hints(out_width, "att_dst", att_init)
            .map_err(|e| TrendGraphError::Tensor(format!("gat att_dst init failed: {}", e)))?;
        let bias = vb
            .get_with_hints(out_width, "bias", Init::Const(0.0))
            .map_err(|e| TrendGraphError::Tensor(format!("gat bias init failed: {}", e)))?;

        Ok(Self {
            lin,
            att_src,
            att_dst,
            bias,
            in_width,
            out_width,
        })
    }

    /// Forward pass that also returns the `[N, N]` attention matrix
    /// (before edge weighting; row = target)
    pub fn apply_with_attention(&self, x: &Tensor, graph: &DenseGraph) -> Result<(Tensor, Tensor)> {
        check_node_features(x, self.in_width, graph)?;

        let z = self
            .lin
            .forward(x)
            .map_err(|e| TrendGraphError::Tensor(format!("gat matmul W failed: {}", e)))?;
        gat_aggregate(
            &z,
            &self.att_src,
            &self.att_dst,
            graph.mask(),
            graph.weights(),
            Some(&self.bias),
        )
    }
}

impl GraphConv for GatConv {
    fn in_width(&self) -> usize {
        self.in_width
    }

    fn out_width(&self) -> usize {
        self.out_width
    }

    fn apply(&self, x: &Tensor, graph: &DenseGraph) -> Result<Tensor> {
        self.apply_with_attention(x, graph).map(|(out, _)| out)
    }
}
