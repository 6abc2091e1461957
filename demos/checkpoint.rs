//! Save a model with metadata, reload it from a JSON config
//!
//! Run with:
//! ```bash
//! cargo run --example checkpoint
//! ```

use trendgraph::prelude::*;
use tracing_subscriber::EnvFilter;

const CONFIG: &str = r#"{
    "architecture": "dcgnn",
    "in_channels": 3,
    "hidden_size": 16,
    "layers_nb": 2,
    "use_gat": true,
    "conv_layer_sizes": [16, 16],
    "output_activation": "sigmoid",
    "seed": 42
}"#;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let device = best_device();
    let dir = tempfile::tempdir()?;
    let config_path = dir.path().join("dcgnn.json");
    let weights_path = dir.path().join("dcgnn.safetensors");
    std::fs::write(&config_path, CONFIG)?;

    let model = TrendModel::from_config_file(&config_path, &device)?;
    let graph = GraphSnapshot::ring(8, true);
    let x = Tensor::randn(0f32, 1.0, (8, 3, 4), &device)?;
    let before = model.forward(&x, &graph)?;

    model.params().save_with_metadata(
        &weights_path,
        CheckpointMetadata::new("dcgnn-demo", "v1", model.config().config_hash()),
    )?;

    let meta = ParamStore::load_metadata(&weights_path)?;
    println!(
        "saved '{}' {} ({} params, config {})",
        meta.name,
        meta.version,
        meta.param_count,
        &meta.config_hash[..12]
    );

    // A different seed gives different weights until the checkpoint is loaded
    let mut config = ModelConfig::from_json_file(&config_path)?;
    config.seed = Some(7);
    anyhow::ensure!(config.config_hash() == meta.config_hash, "config hash changed");

    let restored = TrendModel::new(config, &device)?;
    restored.load(&weights_path)?;
    let after = restored.forward(&x, &graph)?;

    let diff = (before - after)?.abs()?.max_all()?.to_scalar::<f32>()?;
    println!("max |before - after| = {:e}", diff);
    Ok(())
}
