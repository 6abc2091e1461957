//! Time unrolling of stacked recurrent cells

use crate::cell::{DcgruCell, RecurrentGraphCell, TgcnCell};
use crate::conv::ConvKind;
use crate::graph::DenseGraph;
use crate::{Result, TrendGraphError};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use tracing::trace;

/// Which cell each recurrent layer is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    Tgcn,
    Dcgru,
}

/// Append-only per-timestep record of the top layer's hidden state
///
/// Capacity is fixed at construction to the sequence length.
#[derive(Debug, Clone)]
pub struct HiddenHistory {
    steps: Vec<Tensor>,
    capacity: usize,
}

impl HiddenHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            steps: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, hidden: Tensor) -> Result<()> {
        if self.steps.len() >= self.capacity {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "hidden history is full ({} steps)",
                self.capacity
            )));
        }
        self.steps.push(hidden);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hidden state after step `t`
    pub fn get(&self, t: usize) -> Option<&Tensor> {
        self.steps.get(t)
    }

    pub fn steps(&self) -> &[Tensor] {
        &self.steps
    }

    /// `[N, T, H]`
    pub fn stack(&self) -> Result<Tensor> {
        if self.steps.is_empty() {
            return Err(TrendGraphError::ShapeMismatch(
                "cannot stack an empty hidden history".into(),
            ));
        }
        Tensor::stack(&self.steps, 1)
            .map_err(|e| TrendGraphError::Tensor(format!("history stack failed: {}", e)))
    }
}

/// Output of one unroll
#[derive(Debug, Clone)]
pub struct Unrolled {
    /// Final hidden state of every layer, bottom first
    pub final_states: Vec<Tensor>,
    /// Top-layer hidden state after every step, when requested
    pub history: Option<HiddenHistory>,
}

impl Unrolled {
    /// Top layer's final hidden state
    pub fn last_hidden(&self) -> Result<&Tensor> {
        self.final_states
            .last()
            .ok_or_else(|| TrendGraphError::ShapeMismatch("unroll produced no layers".into()))
    }
}

/// Drives a stack of cells over the time axis
///
/// At every step layer 0 reads `x_t`, and layer `i + 1` reads the state
/// layer `i` produced in the same step. Carried states are replaced only
/// after the whole stack has stepped.
#[derive(Debug)]
pub struct SequenceUnroller {
    cells: Vec<Box<dyn RecurrentGraphCell>>,
}

impl SequenceUnroller {
    /// Build `layers` cells of one type; parameters live under `layers.{i}.*`
    pub fn new(
        cell_type: CellType,
        in_channels: usize,
        hidden_size: usize,
        layers: usize,
        kind: ConvKind,
        conv_sizes: &[usize],
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut cells: Vec<Box<dyn RecurrentGraphCell>> = Vec::with_capacity(layers);
        for i in 0..layers {
            let input_width = if i == 0 { in_channels } else { hidden_size };
            let layer_vb = vb.pp(format!("layers.{}", i));
            let cell: Box<dyn RecurrentGraphCell> = match cell_type {
                CellType::Tgcn => Box::new(TgcnCell::new(
                    input_width,
                    hidden_size,
                    kind,
                    conv_sizes,
                    layer_vb,
                )?),
                CellType::Dcgru => Box::new(DcgruCell::new(
                    input_width,
                    hidden_size,
                    kind,
                    conv_sizes,
                    layer_vb,
                )?),
            };
            cells.push(cell);
        }
        Self::from_cells(cells)
    }

    /// Wrap already-built cells; widths must chain
    pub fn from_cells(cells: Vec<Box<dyn RecurrentGraphCell>>) -> Result<Self> {
        if cells.is_empty() {
            return Err(TrendGraphError::Config("unroller needs at least one cell".into()));
        }
        for (i, pair) in cells.windows(2).enumerate() {
            if pair[1].input_width() != pair[0].hidden_size() {
                return Err(TrendGraphError::Config(format!(
                    "layer {} expects {} inputs but layer {} emits {}",
                    i + 1,
                    pair[1].input_width(),
                    i,
                    pair[0].hidden_size()
                )));
            }
        }
        Ok(Self { cells })
    }

    pub fn num_layers(&self) -> usize {
        self.cells.len()
    }

    pub fn in_channels(&self) -> usize {
        self.cells[0].input_width()
    }

    /// Top layer's hidden width
    pub fn hidden_size(&self) -> usize {
        self.cells[self.cells.len() - 1].hidden_size()
    }

    /// One all-zero `[N, H_i]` state per layer
    pub fn zero_state(&self, num_nodes: usize, device: &Device) -> Result<Vec<Tensor>> {
        self.cells
            .iter()
            .map(|cell| {
                Tensor::zeros((num_nodes, cell.hidden_size()), DType::F32, device)
                    .map_err(|e| TrendGraphError::Tensor(format!("zero state failed: {}", e)))
            })
            .collect()
    }

    /// Run the stack over `x: [N, F, T]`
    ///
    /// Missing initial states start at zero. With `record_history` the top
    /// layer's state after every step is kept in [`Unrolled::history`].
    pub fn unroll(
        &self,
        x: &Tensor,
        graph: &DenseGraph,
        initial: Option<&[Tensor]>,
        record_history: bool,
    ) -> Result<Unrolled> {
        let (n, f, steps) = x.dims3().map_err(|_| {
            TrendGraphError::ShapeMismatch(format!(
                "sequence input must be [N, F, T], got {:?}",
                x.dims()
            ))
        })?;
        if f != self.in_channels() {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "expected {} input channels, got {}",
                self.in_channels(),
                f
            )));
        }
        if steps == 0 {
            return Err(TrendGraphError::ShapeMismatch(
                "sequence has no timesteps".into(),
            ));
        }
        if n != graph.num_nodes() {
            return Err(TrendGraphError::ShapeMismatch(format!(
                "input has {} nodes but graph has {}",
                n,
                graph.num_nodes()
            )));
        }

        let mut states = match initial {
            Some(given) => {
                if given.len() != self.cells.len() {
                    return Err(TrendGraphError::ShapeMismatch(format!(
                        "expected {} initial states, got {}",
                        self.cells.len(),
                        given.len()
                    )));
                }
                for (i, (state, cell)) in given.iter().zip(self.cells.iter()).enumerate() {
                    if state.dims() != &[n, cell.hidden_size()][..] {
                        return Err(TrendGraphError::ShapeMismatch(format!(
                            "initial state {} must be [{}, {}], got {:?}",
                            i,
                            n,
                            cell.hidden_size(),
                            state.dims()
                        )));
                    }
                }
                given.to_vec()
            }
            None => self.zero_state(n, x.device())?,
        };

        // [T, N, F] so each step is a contiguous [N, F] slice
        let by_time = x
            .permute((2, 0, 1))
            .and_then(|t| t.contiguous())
            .map_err(|e| TrendGraphError::Tensor(format!("time-major transpose failed: {}", e)))?;

        let mut history = record_history.then(|| HiddenHistory::with_capacity(steps));

        for t in 0..steps {
            let x_t = by_time.get(t)?;

            let mut next = Vec::with_capacity(self.cells.len());
            let mut input = x_t;
            for (cell, h_prev) in self.cells.iter().zip(states.iter()) {
                let h_new = cell.step(&input, h_prev, graph)?;
                input = h_new.clone();
                next.push(h_new);
            }
            states = next;

            if let Some(history) = history.as_mut() {
                history.push(input)?;
            }
            trace!(step = t, of = steps, "unrolled timestep");
        }

        Ok(Unrolled {
            final_states: states,
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphSnapshot;
    use candle_nn::VarMap;

    fn unroller(cell_type: CellType, layers: usize, varmap: &VarMap) -> SequenceUnroller {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        SequenceUnroller::new(cell_type, 2, 6, layers, ConvKind::Gcn, &[8], vb).unwrap()
    }

    #[test]
    fn test_history_capacity() {
        let device = Device::Cpu;
        let mut history = HiddenHistory::with_capacity(2);
        let h = Tensor::zeros((3, 4), DType::F32, &device).unwrap();
        history.push(h.clone()).unwrap();
        history.push(h.clone()).unwrap();
        assert!(history.push(h).is_err());
        assert_eq!(history.stack().unwrap().dims(), &[3, 2, 4]);
        assert!(HiddenHistory::with_capacity(1).stack().is_err());
    }

    #[test]
    fn test_unroll_shapes_and_history() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let unroller = unroller(CellType::Tgcn, 2, &varmap);
        let graph = GraphSnapshot::ring(4, true).prepare(&device).unwrap();
        let x = Tensor::randn(0f32, 1.0, (4, 2, 5), &device).unwrap();

        let out = unroller.unroll(&x, &graph, None, true).unwrap();
        assert_eq!(out.final_states.len(), 2);
        assert_eq!(out.last_hidden().unwrap().dims(), &[4, 6]);

        let history = out.history.unwrap();
        assert_eq!(history.len(), 5);
        let last = history.get(4).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(last, out.final_states[1].to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_history_not_recorded_by_default() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let unroller = unroller(CellType::Dcgru, 1, &varmap);
        let graph = GraphSnapshot::ring(3, false).prepare(&device).unwrap();
        let x = Tensor::randn(0f32, 1.0, (3, 2, 2), &device).unwrap();
        assert!(unroller.unroll(&x, &graph, None, false).unwrap().history.is_none());
    }

    #[test]
    fn test_initial_state_is_used() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let unroller = unroller(CellType::Tgcn, 1, &varmap);
        let graph = GraphSnapshot::ring(4, true).prepare(&device).unwrap();
        let x = Tensor::randn(0f32, 1.0, (4, 2, 1), &device).unwrap();

        let from_zero = unroller.unroll(&x, &graph, None, false).unwrap();
        let explicit_zero = unroller.zero_state(4, &device).unwrap();
        let same = unroller.unroll(&x, &graph, Some(&explicit_zero), false).unwrap();
        assert_eq!(
            from_zero.final_states[0].to_vec2::<f32>().unwrap(),
            same.final_states[0].to_vec2::<f32>().unwrap()
        );

        let ones = vec![Tensor::ones((4, 6), DType::F32, &device).unwrap()];
        let other = unroller.unroll(&x, &graph, Some(&ones), false).unwrap();
        assert_ne!(
            from_zero.final_states[0].to_vec2::<f32>().unwrap(),
            other.final_states[0].to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let unroller = unroller(CellType::Tgcn, 2, &varmap);
        let graph = GraphSnapshot::ring(4, true).prepare(&device).unwrap();

        let rank2 = Tensor::zeros((4, 2), DType::F32, &device).unwrap();
        let wrong_f = Tensor::zeros((4, 3, 2), DType::F32, &device).unwrap();
        let no_steps = Tensor::zeros((4, 2, 0), DType::F32, &device).unwrap();
        let wrong_n = Tensor::zeros((5, 2, 2), DType::F32, &device).unwrap();
        for x in [&rank2, &wrong_f, &no_steps, &wrong_n] {
            assert!(matches!(
                unroller.unroll(x, &graph, None, false),
                Err(TrendGraphError::ShapeMismatch(_))
            ));
        }

        let x = Tensor::zeros((4, 2, 2), DType::F32, &device).unwrap();
        let too_few = vec![Tensor::zeros((4, 6), DType::F32, &device).unwrap()];
        assert!(matches!(
            unroller.unroll(&x, &graph, Some(&too_few), false),
            Err(TrendGraphError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_from_cells_checks_chaining() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let a = TgcnCell::new(2, 6, ConvKind::Gcn, &[4], vb.pp("a")).unwrap();
        let b = TgcnCell::new(5, 6, ConvKind::Gcn, &[4], vb.pp("b")).unwrap();
        let cells: Vec<Box<dyn RecurrentGraphCell>> = vec![Box::new(a), Box::new(b)];
        assert!(matches!(
            SequenceUnroller::from_cells(cells),
            Err(TrendGraphError::Config(_))
        ));
        assert!(SequenceUnroller::from_cells(Vec::new()).is_err());
    }
}
