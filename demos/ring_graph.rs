//! Forward pass of every architecture over a 10-stock ring
//!
//! Demonstrates: graph → model → per-node scores (+ attention weights)
//!
//! Run with:
//! ```bash
//! RUST_LOG=debug cargo run --example ring_graph
//! ```

use trendgraph::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let device = best_device();
    let graph = GraphSnapshot::ring(10, true);

    // 10 stocks, 2 features (return, volume change), 5-day window
    let x = Tensor::randn(0f32, 1.0, (10, 2, 5), &device)?;

    for architecture in [Architecture::Tgcn, Architecture::A3tgcn, Architecture::Dcgnn] {
        let config = ModelConfig::new(2, 1, 32)
            .with_architecture(architecture)
            .with_layers(2)
            .with_gat(true)
            .with_output_activation(OutputActivation::Sigmoid)
            .with_seed(7);
        let model = TrendModel::new(config, &device)?;

        let out = model.forward_with_state(&x, &graph, None)?;
        let probs = out.output.flatten_all()?.to_vec1::<f32>()?;

        println!(
            "\n{} ({} params)",
            architecture,
            model.params().param_count()?
        );
        for (node, p) in probs.iter().enumerate() {
            println!("  stock {:>2}: P(up) = {:.3}", node, p);
        }

        if let Some(weights) = out.attention {
            let first = weights.get(0)?.flatten_all()?.to_vec1::<f32>()?;
            println!("  attention over window for stock 0: {:.3?}", first);
        }
    }

    Ok(())
}
