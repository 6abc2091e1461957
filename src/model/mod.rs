//! Trend models
//!
//! A [`TrendModel`] wires the pieces together:
//!
//! ```text
//! x [N, F, T] ──► SequenceUnroller (L stacked cells) ──► summary [N, H] ──► ReadoutHead ──► [N, out]
//!                              │                             ▲
//!                              └── history [N, T, H] ──► TemporalAttentionPool (A3TGCN only)
//! ```
//!
//! | architecture | cell | summary |
//! |---|---|---|
//! | `tgcn`   | [`crate::cell::TgcnCell`]  | last hidden state |
//! | `a3tgcn` | [`crate::cell::TgcnCell`]  | attention-pooled history |
//! | `dcgnn`  | [`crate::cell::DcgruCell`] | last hidden state |
//!
//! Parameters live in one [`ParamStore`] under `recurrent.layers.{i}.*`,
//! `attention.*` and `readout.*`.

mod attention;
mod config;
mod readout;
mod unroller;

pub use attention::{PooledHistory, TemporalAttentionPool};
pub use config::{Architecture, ModelConfig};
pub use readout::{OutputActivation, ReadoutHead};
pub use unroller::{CellType, HiddenHistory, SequenceUnroller, Unrolled};

use crate::graph::{DenseGraph, GraphSnapshot};
use crate::params::ParamStore;
use crate::{Result, TrendGraphError};
use candle_core::{Device, Tensor, Var};
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything one forward pass produces
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// `[N, out_channels]`
    pub output: Tensor,
    /// Final hidden state of every recurrent layer, bottom first
    pub final_hidden: Vec<Tensor>,
    /// Temporal attention weights `[N, T, 1]` (A3TGCN only)
    pub attention: Option<Tensor>,
}

/// Graph-recurrent trend model
///
/// Holds no state between calls: every forward pass starts from the
/// supplied initial states or zeros.
#[derive(Debug)]
pub struct TrendModel {
    config: ModelConfig,
    params: ParamStore,
    unroller: SequenceUnroller,
    attention: Option<TemporalAttentionPool>,
    readout: ReadoutHead,
}

impl TrendModel {
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        if config.layers_nb < 1 {
            warn!(
                layers_nb = config.layers_nb,
                "layers_nb below 1, building a single recurrent layer"
            );
        }

        let params = ParamStore::new(device);
        let vb = params.var_builder();

        let cell_type = match config.architecture {
            Architecture::Tgcn | Architecture::A3tgcn => CellType::Tgcn,
            Architecture::Dcgnn => CellType::Dcgru,
        };
        let unroller = SequenceUnroller::new(
            cell_type,
            config.in_channels,
            config.hidden_size,
            config.effective_layers(),
            config.conv_kind(),
            &config.conv_layer_sizes,
            vb.pp("recurrent"),
        )?;

        let attention = match config.architecture {
            Architecture::A3tgcn => Some(TemporalAttentionPool::new(
                config.hidden_size,
                vb.pp("attention"),
            )?),
            _ => None,
        };

        let readout = ReadoutHead::new(
            config.hidden_size,
            config.out_channels,
            config.output_activation,
            vb.pp("readout"),
        )?;

        if let Some(seed) = config.seed {
            params.reinitialize(seed)?;
        }

        info!(
            architecture = %config.architecture,
            layers = unroller.num_layers(),
            conv = ?config.conv_kind(),
            params = params.param_count()?,
            "built trend model"
        );

        Ok(Self {
            config,
            params,
            unroller,
            attention,
            readout,
        })
    }

    /// Build from a JSON config file
    pub fn from_config_file(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        Self::new(ModelConfig::from_json_file(path)?, device)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn device(&self) -> &Device {
        self.params.device()
    }

    pub fn unroller(&self) -> &SequenceUnroller {
        &self.unroller
    }

    pub fn trainable_vars(&self) -> Result<Vec<Var>> {
        self.params.trainable_vars()
    }

    /// `x: [N, F, T]` → scores `[N, out_channels]`
    pub fn forward(&self, x: &Tensor, graph: &GraphSnapshot) -> Result<Tensor> {
        self.forward_with_state(x, graph, None).map(|out| out.output)
    }

    /// Forward pass from explicit initial states (zeros when `None`)
    pub fn forward_with_state(
        &self,
        x: &Tensor,
        graph: &GraphSnapshot,
        initial: Option<&[Tensor]>,
    ) -> Result<ModelOutput> {
        let dense = graph.prepare(self.device())?;
        self.forward_prepared(x, &dense, initial)
    }

    /// Forward pass over an already densified graph
    pub fn forward_prepared(
        &self,
        x: &Tensor,
        graph: &DenseGraph,
        initial: Option<&[Tensor]>,
    ) -> Result<ModelOutput> {
        let unrolled = self
            .unroller
            .unroll(x, graph, initial, self.attention.is_some())?;

        let (summary, attention) = match (&self.attention, &unrolled.history) {
            (Some(pool), Some(history)) => {
                let pooled = pool.pool(history)?;
                (pooled.pooled, Some(pooled.weights))
            }
            _ => (unrolled.last_hidden()?.clone(), None),
        };

        let output = self.readout.forward(&summary)?;
        debug!(
            nodes = graph.num_nodes(),
            steps = x.dims().get(2).copied().unwrap_or(0),
            "forward pass"
        );

        Ok(ModelOutput {
            output,
            final_hidden: unrolled.final_states,
            attention,
        })
    }

    /// Independent samples sharing one graph → `[B, N, out_channels]`
    pub fn forward_batch(&self, samples: &[Tensor], graph: &GraphSnapshot) -> Result<Tensor> {
        if samples.is_empty() {
            return Err(TrendGraphError::ShapeMismatch("empty batch".into()));
        }

        let dense = graph.prepare(self.device())?;
        let outputs = samples
            .iter()
            .map(|x| self.forward_prepared(x, &dense, None).map(|out| out.output))
            .collect::<Result<Vec<_>>>()?;

        Tensor::stack(&outputs, 0)
            .map_err(|e| TrendGraphError::Tensor(format!("batch stack failed: {}", e)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.params.save(path)
    }

    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        self.params.load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, IndexOp};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn features(n: usize, f: usize, t: usize, seed: u64) -> Tensor {
        let mut rng = StdRng::seed_from_u64(seed);
        let values: Vec<f32> = (0..n * f * t).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Tensor::from_vec(values, (n, f, t), &Device::Cpu).unwrap()
    }

    fn flat(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5, "{} vs {}", x, y);
        }
    }

    fn small(architecture: Architecture) -> ModelConfig {
        ModelConfig::new(2, 1, 8)
            .with_architecture(architecture)
            .with_conv_layers(vec![8, 8])
            .with_seed(3)
    }

    #[test]
    fn test_output_shape_for_every_architecture() {
        let graph = GraphSnapshot::ring(6, true);
        let x = features(6, 2, 4, 1);
        for arch in [Architecture::Tgcn, Architecture::A3tgcn, Architecture::Dcgnn] {
            let model = TrendModel::new(small(arch), &Device::Cpu).unwrap();
            let out = model.forward_with_state(&x, &graph, None).unwrap();
            assert_eq!(out.output.dims(), &[6, 1]);
            assert_eq!(out.final_hidden.len(), 1);
            assert_eq!(out.final_hidden[0].dims(), &[6, 8]);
            assert_eq!(out.attention.is_some(), arch == Architecture::A3tgcn);
        }
    }

    #[test]
    fn test_end_to_end_ring_with_gat() {
        let graph = GraphSnapshot::ring(10, true);
        let x = features(10, 2, 5, 9);
        for arch in [Architecture::Tgcn, Architecture::Dcgnn] {
            let config = ModelConfig::new(2, 1, 32)
                .with_architecture(arch)
                .with_layers(2)
                .with_gat(true)
                .with_seed(5);
            let model = TrendModel::new(config, &Device::Cpu).unwrap();
            let out = model.forward(&x, &graph).unwrap();
            assert_eq!(out.dims(), &[10, 1]);
            assert!(flat(&out).iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_forward_has_no_hidden_state_leak() {
        let model = TrendModel::new(small(Architecture::Tgcn).with_layers(2), &Device::Cpu).unwrap();
        let graph = GraphSnapshot::ring(5, true);
        let x = features(5, 2, 3, 2);

        let first = flat(&model.forward(&x, &graph).unwrap());
        let _other = model.forward(&features(5, 2, 3, 77), &graph).unwrap();
        let second = flat(&model.forward(&x, &graph).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_attention_weights_are_distribution() {
        let model = TrendModel::new(small(Architecture::A3tgcn), &Device::Cpu).unwrap();
        let graph = GraphSnapshot::ring(4, false);
        let out = model.forward_with_state(&features(4, 2, 6, 4), &graph, None).unwrap();

        let weights = out.attention.unwrap();
        assert_eq!(weights.dims(), &[4, 6, 1]);
        assert!(flat(&weights).iter().all(|w| *w >= 0.0));
        for s in flat(&weights.sum(1).unwrap()) {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_causality() {
        let model = TrendModel::new(small(Architecture::Tgcn).with_layers(2), &Device::Cpu).unwrap();
        let dense = GraphSnapshot::ring(5, true).prepare(&Device::Cpu).unwrap();
        let steps = 4;
        let x = features(5, 2, steps, 6);

        let full = model.unroller().unroll(&x, &dense, None, true).unwrap();
        let history = full.history.unwrap();

        // history[T-2] equals the final state of a run truncated to T-1 steps
        let truncated = x.narrow(2, 0, steps - 1).unwrap();
        let short = model.unroller().unroll(&truncated, &dense, None, false).unwrap();
        assert_close(
            &flat(history.get(steps - 2).unwrap()),
            &flat(short.last_hidden().unwrap()),
        );

        // changing the last step leaves earlier states untouched
        let altered_last = features(5, 2, 1, 99);
        let altered = Tensor::cat(&[&truncated, &altered_last], 2).unwrap();
        let altered_run = model.unroller().unroll(&altered, &dense, None, true).unwrap();
        let altered_history = altered_run.history.unwrap();
        for t in 0..steps - 1 {
            assert_close(
                &flat(history.get(t).unwrap()),
                &flat(altered_history.get(t).unwrap()),
            );
        }
        assert_ne!(
            flat(history.get(steps - 1).unwrap()),
            flat(altered_history.get(steps - 1).unwrap())
        );
    }

    #[test]
    fn test_zero_layers_clamped_to_one() {
        let graph = GraphSnapshot::ring(5, true);
        let x = features(5, 2, 3, 8);

        let zero = TrendModel::new(small(Architecture::Dcgnn).with_layers(0), &Device::Cpu).unwrap();
        let one = TrendModel::new(small(Architecture::Dcgnn).with_layers(1), &Device::Cpu).unwrap();

        assert_eq!(zero.unroller().num_layers(), 1);
        assert_eq!(zero.params().names().unwrap(), one.params().names().unwrap());
        assert_eq!(
            flat(&zero.forward(&x, &graph).unwrap()),
            flat(&one.forward(&x, &graph).unwrap())
        );
    }

    #[test]
    fn test_explicit_initial_state() {
        let model = TrendModel::new(small(Architecture::Tgcn), &Device::Cpu).unwrap();
        let graph = GraphSnapshot::ring(5, true);
        let x = features(5, 2, 2, 10);

        let zeros = vec![Tensor::zeros((5, 8), DType::F32, &Device::Cpu).unwrap()];
        let implicit = model.forward_with_state(&x, &graph, None).unwrap();
        let explicit = model.forward_with_state(&x, &graph, Some(&zeros)).unwrap();
        assert_eq!(flat(&implicit.output), flat(&explicit.output));

        let bad = vec![Tensor::zeros((5, 7), DType::F32, &Device::Cpu).unwrap()];
        assert!(matches!(
            model.forward_with_state(&x, &graph, Some(&bad)),
            Err(TrendGraphError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_shape_errors() {
        let model = TrendModel::new(small(Architecture::A3tgcn), &Device::Cpu).unwrap();
        let graph = GraphSnapshot::ring(5, true);

        let cases = [
            Tensor::zeros((5, 2), DType::F32, &Device::Cpu).unwrap(),
            Tensor::zeros((5, 3, 4), DType::F32, &Device::Cpu).unwrap(),
            Tensor::zeros((5, 2, 0), DType::F32, &Device::Cpu).unwrap(),
            Tensor::zeros((6, 2, 4), DType::F32, &Device::Cpu).unwrap(),
        ];
        for x in &cases {
            assert!(matches!(
                model.forward(x, &graph),
                Err(TrendGraphError::ShapeMismatch(_))
            ));
        }
    }

    #[test]
    fn test_forward_batch() {
        let model = TrendModel::new(small(Architecture::Tgcn), &Device::Cpu).unwrap();
        let graph = GraphSnapshot::ring(4, true);
        let samples = vec![features(4, 2, 3, 1), features(4, 2, 3, 2), features(4, 2, 3, 3)];

        let batch = model.forward_batch(&samples, &graph).unwrap();
        assert_eq!(batch.dims(), &[3, 4, 1]);

        let single = model.forward(&samples[1], &graph).unwrap();
        assert_eq!(flat(&batch.i(1).unwrap()), flat(&single));

        assert!(model.forward_batch(&[], &graph).is_err());
    }

    #[test]
    fn test_seeded_models_match_and_checkpoint_round_trip() {
        let graph = GraphSnapshot::ring(4, true);
        let x = features(4, 2, 3, 12);

        let a = TrendModel::new(small(Architecture::A3tgcn).with_gat(true), &Device::Cpu).unwrap();
        let b = TrendModel::new(small(Architecture::A3tgcn).with_gat(true), &Device::Cpu).unwrap();
        let out_a = flat(&a.forward(&x, &graph).unwrap());
        assert_eq!(out_a, flat(&b.forward(&x, &graph).unwrap()));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a3tgcn.safetensors");
        a.save(&path).unwrap();

        let c = TrendModel::new(
            small(Architecture::A3tgcn).with_gat(true).with_seed(100),
            &Device::Cpu,
        )
        .unwrap();
        assert_ne!(out_a, flat(&c.forward(&x, &graph).unwrap()));
        c.load(&path).unwrap();
        assert_eq!(out_a, flat(&c.forward(&x, &graph).unwrap()));
    }

    #[test]
    fn test_parameter_names() {
        let model = TrendModel::new(small(Architecture::A3tgcn).with_layers(2), &Device::Cpu).unwrap();
        let names = model.params().names().unwrap();
        assert!(names.contains(&"recurrent.layers.0.linear_u.weight".to_string()));
        assert!(names.contains(&"recurrent.layers.1.conv.0.lin.weight".to_string()));
        assert!(names.contains(&"attention.score.weight".to_string()));
        assert!(names.contains(&"readout.linear.bias".to_string()));
    }

    #[test]
    fn test_gate_width_uses_hidden_size_not_conv_width() {
        // default conv_layer_sizes [32, 32], hidden 16
        let model = TrendModel::new(ModelConfig::new(2, 1, 16).with_seed(1), &Device::Cpu).unwrap();
        let tensors = model.params().named_tensors().unwrap();
        assert_eq!(tensors["recurrent.layers.0.linear_u.weight"].dims(), &[16, 2 + 16 + 16]);
        assert_eq!(tensors["recurrent.layers.0.linear_c.weight"].dims(), &[16, 34]);
        assert_eq!(tensors["recurrent.layers.0.conv.1.lin.weight"].dims(), &[16, 32]);

        let x = Tensor::randn(0f32, 1.0, (6, 2, 3), &Device::Cpu).unwrap();
        let out = model.forward(&x, &GraphSnapshot::ring(6, true)).unwrap();
        assert_eq!(out.dims(), &[6, 1]);
    }
}
