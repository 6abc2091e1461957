//! Fused-gate T-GCN cell

use super::{check_hidden, gated_update, GateTrace, RecurrentGraphCell};
use crate::conv::{ConvKind, GraphConvStack};
use crate::graph::DenseGraph;
use crate::primitives::{sigmoid, tanh};
use crate::{Result, TrendGraphError};
use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};

/// T-GCN cell: one spatial signal shared by all gates
///
/// ```text
/// g = σ(GraphConvStack(x))                    squashed to (0, 1)
/// u = σ(W_u [x ‖ g ‖ h])
/// r = σ(W_r [x ‖ g ‖ h])
/// c = tanh(W_c [x ‖ g ‖ r ⊙ h])
/// h' = u ⊙ h + (1 - u) ⊙ c
/// ```
///
/// The sigmoid on `g` is part of the formulation: the gate layers expect a
/// bounded spatial input.
///
/// Parameters: `conv.*`, `linear_u.*`, `linear_r.*`, `linear_c.*`.
#[derive(Debug)]
pub struct TgcnCell {
    spatial: GraphConvStack,
    linear_u: Linear,
    linear_r: Linear,
    linear_c: Linear,
    input_width: usize,
    hidden_size: usize,
}

impl TgcnCell {
    /// Build a cell whose spatial stack has the given layer widths
    ///
    /// The last stack width is forced to `hidden_size`, so gate layers take
    /// `input_width + 2 * hidden_size` inputs.
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
        let spatial = GraphConvStack::new(kind, input_width, &widths, vb.pp("conv"))?;
        let cat_width = input_width + 2 * hidden_size;

        let linear = |name: &str| {
            candle_nn::linear(cat_width, hidden_size, vb.pp(name))
                .map_err(|e| TrendGraphError::Tensor(format!("tgcn {} init failed: {}", name, e)))
        };

        Ok(Self {
            linear_u: linear("linear_u")?,
            linear_r: linear("linear_r")?,
            linear_c: linear("linear_c")?,
            spatial,
            input_width,
            hidden_size,
        })
    }

    pub fn spatial(&self) -> &GraphConvStack {
        &self.spatial
    }

    /// One step, keeping every gate value
    pub fn step_traced(&self, x: &Tensor, h_prev: &Tensor, graph: &DenseGraph) -> Result<GateTrace> {
        let g = sigmoid(&self.spatial.apply(x, graph)?)?;
        check_hidden(h_prev, graph.num_nodes(), self.hidden_size)?;

        let cat = Tensor::cat(&[x, &g, h_prev], 1)
            .map_err(|e| TrendGraphError::Tensor(format!("tgcn gate cat failed: {}", e)))?;
        let update = sigmoid(&self.linear_u.forward(&cat)?)?;
        let reset = sigmoid(&self.linear_r.forward(&cat)?)?;

        let reset_hidden = reset.mul(h_prev)?;
        let cat_reset = Tensor::cat(&[x, &g, &reset_hidden], 1)
            .map_err(|e| TrendGraphError::Tensor(format!("tgcn candidate cat failed: {}", e)))?;
        let candidate = tanh(&self.linear_c.forward(&cat_reset)?)?;

        let hidden = gated_update(&update, h_prev, &candidate)?;
        Ok(GateTrace {
            update,
            reset,
            candidate,
            hidden,
        })
    }
}

impl RecurrentGraphCell for TgcnCell {
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

    fn cell(kind: ConvKind, varmap: &VarMap) -> TgcnCell {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        TgcnCell::new(2, 8, kind, &[8, 8], vb).unwrap()
    }

    #[test]
    fn test_step_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let cell = cell(ConvKind::Gcn, &varmap);
        let graph = GraphSnapshot::ring(5, true).prepare(&device).unwrap();

        let x = Tensor::randn(0f32, 1.0, (5, 2), &device).unwrap();
        let h = Tensor::zeros((5, 8), DType::F32, &device).unwrap();
        let out = cell.step(&x, &h, &graph).unwrap();
        assert_eq!(out.dims(), &[5, 8]);
        assert_eq!(cell.input_width(), 2);
        assert_eq!(cell.hidden_size(), 8);
    }

    #[test]
    fn test_gates_bounded_and_hidden_is_convex_combination() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let cell = cell(ConvKind::Gat, &varmap);
        let graph = GraphSnapshot::ring(6, true).prepare(&device).unwrap();

        let x = Tensor::randn(0f32, 3.0, (6, 2), &device).unwrap();
        let h = Tensor::randn(0f32, 1.0, (6, 8), &device).unwrap();
        let trace = cell.step_traced(&x, &h, &graph).unwrap();

        let u = trace.update.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let r = trace.reset.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let c = trace.candidate.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let hp = h.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let hn = trace.hidden.flatten_all().unwrap().to_vec1::<f32>().unwrap();

        for i in 0..u.len() {
            assert!((0.0..=1.0).contains(&u[i]));
            assert!((0.0..=1.0).contains(&r[i]));
            assert!((-1.0..=1.0).contains(&c[i]));
            let lo = hp[i].min(c[i]) - 1e-5;
            let hi = hp[i].max(c[i]) + 1e-5;
            assert!(hn[i] >= lo && hn[i] <= hi, "h'[{}] = {} outside [{}, {}]", i, hn[i], lo, hi);
        }
    }

    #[test]
    fn test_parameter_layout() {
        let varmap = VarMap::new();
        let _cell = cell(ConvKind::Gcn, &varmap);
        let data = varmap.data().lock().unwrap();

        // gate input width = 2 (x) + 8 (g) + 8 (h)
        assert_eq!(data["linear_u.weight"].dims(), &[8, 18]);
        assert_eq!(data["linear_c.bias"].dims(), &[8]);
        assert!(data.contains_key("conv.0.lin.weight"));
        assert!(data.contains_key("conv.1.bias"));
    }

    #[test]
    fn test_spatial_width_follows_hidden_size() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let cell = TgcnCell::new(2, 16, ConvKind::Gat, &[32, 32], vb).unwrap();
        assert_eq!(cell.spatial().out_width(), 16);

        let data = varmap.data().lock().unwrap();
        // 2 (x) + 16 (g) + 16 (h)
        assert_eq!(data["linear_u.weight"].dims(), &[16, 34]);
        assert_eq!(data["linear_r.weight"].dims(), &[16, 34]);
        assert_eq!(data["conv.0.lin.weight"].dims(), &[32, 2]);
        assert_eq!(data["conv.1.lin.weight"].dims(), &[16, 32]);
    }

    #[test]
    fn test_rejects_bad_hidden_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let cell = cell(ConvKind::Gcn, &varmap);
        let graph = GraphSnapshot::ring(5, true).prepare(&device).unwrap();

        let x = Tensor::zeros((5, 2), DType::F32, &device).unwrap();
        let h = Tensor::zeros((5, 7), DType::F32, &device).unwrap();
        assert!(matches!(
            cell.step(&x, &h, &graph),
            Err(TrendGraphError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_rejects_zero_hidden() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            TgcnCell::new(2, 0, ConvKind::Gcn, &[4], vb),
            Err(TrendGraphError::Config(_))
        ));
    }
}
