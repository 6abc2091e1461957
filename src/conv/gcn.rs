//! GCN operator (Kipf & Welling 2017)

use super::{check_node_features, GraphConv};
use crate::graph::DenseGraph;
use crate::primitives::gnn::gcn_aggregate;
use crate::{Result, TrendGraphError};
use candle_core::Tensor;
use candle_nn::{Init, Linear, Module, VarBuilder};

/// Plain-aggregation graph convolution
///
/// ```text
/// h_out = D⁻¹/²(A + I)D⁻¹/² @ (X @ W) + b
/// ```
///
/// Static edge weights enter through `A`. The bias is added after
/// aggregation, so isolated nodes still see it.
#[derive(Debug)]
pub struct GcnConv {
    lin: Linear,
    bias: Tensor,
    in_width: usize,
    out_width: usize,
}

impl GcnConv {
    /// Parameters: `lin.weight [out, in]`, `bias [out]` (zero-initialized)
    pub fn new(in_width: usize, out_width: usize, vb: VarBuilder) -> Result<Self> {
        let lin = candle_nn::linear_no_bias(in_width, out_width, vb.pp("lin"))
            .map_err(|e| TrendGraphError::Tensor(format!("gcn lin init failed: {}", e)))?;
        let bias = vb
            .get_with_hints(out_width, "bias", Init::Const(0.0))
            .map_err(|e| TrendGraphError::Tensor(format!("gcn bias init failed: {}", e)))?;

        Ok(Self {
            lin,
            bias,
            in_width,
            out_width,
        })
    }
}

impl GraphConv for GcnConv {
    fn in_width(&self) -> usize {
        self.in_width
    }

    fn out_width(&self) -> usize {
        self.out_width
    }

    fn apply(&self, x: &Tensor, graph: &DenseGraph) -> Result<Tensor> {
        check_node_features(x, self.in_width, graph)?;

        let h = self
            .lin
            .forward(x)
            .map_err(|e| TrendGraphError::Tensor(format!("gcn matmul W failed: {}", e)))?;
        gcn_aggregate(graph.gcn_norm(), &h, Some(&self.bias))
    }
}
