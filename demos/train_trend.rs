//! Training on a synthetic momentum signal
//!
//! Each stock's label is "up" when the mean of its first feature over the
//! window is positive, blended with its neighbours on a sector graph.
//!
//! Run with:
//! ```bash
//! cargo run --example train_trend
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trendgraph::prelude::*;
use tracing_subscriber::EnvFilter;

const STOCKS: usize = 12;
const FEATURES: usize = 2;
const WINDOW: usize = 6;

/// Two sectors of six stocks, fully connected inside each sector
fn sector_graph() -> trendgraph::Result<GraphSnapshot> {
    let mut edges = Vec::new();
    for sector in 0..2 {
        let base = sector * 6;
        for a in 0..6 {
            for b in 0..6 {
                if a != b {
                    edges.push((base + a, base + b));
                }
            }
        }
    }
    GraphSnapshot::unweighted(STOCKS, edges)
}

fn synthetic_sample(rng: &mut StdRng, graph: &GraphSnapshot, device: &Device) -> anyhow::Result<TrendSample> {
    let mut values = vec![0f32; STOCKS * FEATURES * WINDOW];
    let mut momentum = vec![0f32; STOCKS];

    for stock in 0..STOCKS {
        let drift: f32 = rng.gen_range(-0.5..0.5);
        for f in 0..FEATURES {
            for t in 0..WINDOW {
                let v = if f == 0 { drift } else { 0.0 } + rng.gen_range(-1.0..1.0);
                values[(stock * FEATURES + f) * WINDOW + t] = v;
                if f == 0 {
                    momentum[stock] += v / WINDOW as f32;
                }
            }
        }
    }

    let sector_mean: Vec<f32> = (0..2)
        .map(|s| momentum[s * 6..s * 6 + 6].iter().sum::<f32>() / 6.0)
        .collect();
    let labels: Vec<f32> = (0..STOCKS)
        .map(|i| {
            let score = 0.5 * momentum[i] + 0.5 * sector_mean[i / 6];
            if score > 0.0 { 1.0 } else { 0.0 }
        })
        .collect();

    Ok(TrendSample::new(
        Tensor::from_vec(values, (STOCKS, FEATURES, WINDOW), device)?,
        graph.clone(),
        Some(Tensor::from_vec(labels, (STOCKS, 1), device)?),
    )?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let device = best_device();
    let graph = sector_graph()?;
    let mut rng = StdRng::seed_from_u64(2024);

    let train: Vec<TrendSample> = (0..64)
        .map(|_| synthetic_sample(&mut rng, &graph, &device))
        .collect::<anyhow::Result<_>>()?;
    let test: Vec<TrendSample> = (0..16)
        .map(|_| synthetic_sample(&mut rng, &graph, &device))
        .collect::<anyhow::Result<_>>()?;

    let config = ModelConfig::new(FEATURES, 1, 16)
        .with_architecture(Architecture::A3tgcn)
        .with_conv_layers(vec![16, 16])
        .with_seed(11);
    let model = TrendModel::new(config, &device)?;

    let mut trainer = Trainer::new(
        &model,
        TrainingConfig {
            learning_rate: 5e-3,
            epochs: 15,
            patience: Some(4),
            ..Default::default()
        },
    )?;

    println!("before training:\n{}\n", trainer.evaluate(&test)?);

    let tracker = trainer.fit(&train)?;
    println!(
        "trained {} epochs, best loss {:.4}",
        tracker.total_steps(),
        tracker.best_loss().unwrap_or(f32::NAN)
    );

    println!("\nafter training:\n{}", trainer.evaluate(&test)?);
    Ok(())
}
