//! Split-gate DCGRU cell

use super::{check_hidden, gated_update, GateTrace, RecurrentGraphCell};
use crate::conv::{ConvKind, GraphConvStack};
use crate::graph::DenseGraph;
use crate::primitives::{sigmoid, tanh};
use crate::{Result, TrendGraphError};
use candle_core::Tensor;
use candle_nn::VarBuilder;

/// DCGRU cell: every gate owns its own graph convolution stack
///
/// ```text
/// r  = σ(Conv_r([x ‖ h]))
/// u  = σ(Conv_u([x ‖ h]))
/// c  = tanh(Conv_c([x ‖ r ⊙ h]))
/// h' = u ⊙ h + (1 - u) ⊙ c
/// ```
///
/// Spatial mixing happens inside each gate instead of once up front. The
/// price is three stacks: 3× the convolution parameters and 3× the
/// convolution work per timestep compared to [`super::TgcnCell`].
///
/// Each stack uses the configured hidden widths but always ends at
/// `hidden_size`. Parameters: `conv_r.*`, `conv_u.*`, `conv_c.*`.
#[derive(Debug)]
pub struct DcgruCell {
    conv_r: GraphConvStack,
    conv_u: GraphConvStack,
    conv_c: GraphConvStack,
    input_width: usize,
    hidden_size: usize,
}

impl DcgruCell {
    pub fn new(
        input_width: usize,
        hidden_size: usize,
        kind: ConvKind,
        conv_sizes: &[usize],
        vb: VarBuilder,
    ) -> Result<Self> {
        if hidden_size == 0 {
            return Err(TrendGraphError::Config("hidden_size must be non-zero".into()));
        }
        if conv_sizes.is_empty() {
            return Err(TrendGraphError::Config(
                "graph convolution stack needs at least one layer".into(),
            ));
        }

        let mut widths = conv_sizes.to_vec();
        if let Some(last) = widths.last_mut() {
            *last = hidden_size;
        }
        let gate_in = input_width + hidden_size;

        Ok(Self {
            conv_r: GraphConvStack::new(kind, gate_in, &widths, vb.pp("conv_r"))?,
            conv_u: GraphConvStack::new(kind, gate_in, &widths, vb.pp("conv_u"))?,
            conv_c: GraphConvStack::new(kind, gate_in, &widths, vb.pp("conv_c"))?,
            input_width,
            hidden_size,
        })
    }

    /// One step, keeping every gate value
    pub fn step_traced(&self, x: &Tensor, h_prev: &Tensor, graph: &DenseGraph) -> Result<GateTrace> {
        let (n, f) = x.dims2().map_err(|_| {
            TrendGraphError::ShapeMismatch(format!("node features must be [N, F], got {:?}", x.dims()))
        })?;
        if f != self.input_width {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "expected {} input features, got {}",
                self.input_width, f
            )));
        }
        check_hidden(h_prev, n, self.hidden_size)?;

        let xh = Tensor::cat(&[x, h_prev], 1)
            .map_err(|e| TrendGraphError::Tensor(format!("dcgru gate cat failed: {}", e)))?;
        let reset = sigmoid(&self.conv_r.apply(&xh, graph)?)?;
        let update = sigmoid(&self.conv_u.apply(&xh, graph)?)?;

        let reset_hidden = reset.mul(h_prev)?;
        let x_rh = Tensor::cat(&[x, &reset_hidden], 1)
            .map_err(|e| TrendGraphError::Tensor(format!("dcgru candidate cat failed: {}", e)))?;
        let candidate = tanh(&self.conv_c.apply(&x_rh, graph)?)?;

        let hidden = gated_update(&update, h_prev, &candidate)?;
        Ok(GateTrace {
            update,
            reset,
            candidate,
            hidden,
        })
    }
}

impl RecurrentGraphCell for DcgruCell {
    fn input_width(&self) -> usize {
        self.input_width
    }

    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn step(&self, x: &Tensor, h_prev: &Tensor, graph: &DenseGraph) -> Result<Tensor> {
        self.step_traced(x, h_prev, graph).map(|trace| trace.hidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphSnapshot;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_step_shape_and_stack_widths() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cell = DcgruCell::new(3, 6, ConvKind::Gcn, &[16, 32], vb).unwrap();

        let graph = GraphSnapshot::ring(4, true).prepare(&device).unwrap();
        let x = Tensor::randn(0f32, 1.0, (4, 3), &device).unwrap();
        let h = Tensor::zeros((4, 6), DType::F32, &device).unwrap();
        assert_eq!(cell.step(&x, &h, &graph).unwrap().dims(), &[4, 6]);

        let data = varmap.data().lock().unwrap();
        // first layer sees [x ‖ h] = 3 + 6, last layer is forced to hidden_size
        assert_eq!(data["conv_r.0.lin.weight"].dims(), &[16, 9]);
        assert_eq!(data["conv_c.1.lin.weight"].dims(), &[6, 16]);
        assert!(data.contains_key("conv_u.1.bias"));
    }

    #[test]
    fn test_gat_gates_bounded() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cell = DcgruCell::new(2, 4, ConvKind::Gat, &[8, 8], vb).unwrap();

        let graph = GraphSnapshot::ring(5, true).prepare(&device).unwrap();
        let x = Tensor::randn(0f32, 2.0, (5, 2), &device).unwrap();
        let h = Tensor::randn(0f32, 0.5, (5, 4), &device).unwrap();
        let trace = cell.step_traced(&x, &h, &graph).unwrap();

        for t in [&trace.update, &trace.reset] {
            for v in t.flatten_all().unwrap().to_vec1::<f32>().unwrap() {
                assert!((0.0..=1.0).contains(&v));
            }
        }
        for v in trace.candidate.flatten_all().unwrap().to_vec1::<f32>().unwrap() {
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_rejects_wrong_input_width() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let cell = DcgruCell::new(3, 4, ConvKind::Gcn, &[4], vb).unwrap();

        let graph = GraphSnapshot::ring(4, true).prepare(&device).unwrap();
        let x = Tensor::zeros((4, 2), DType::F32, &device).unwrap();
        let h = Tensor::zeros((4, 4), DType::F32, &device).unwrap();
        assert!(matches!(
            cell.step(&x, &h, &graph),
            Err(TrendGraphError::ShapeMismatch(_))
        ));
    }
}
