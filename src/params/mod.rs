//! Named parameter store and checkpoints
//!
//! Every learned tensor of a model lives in one [`candle_nn::VarMap`] under a
//! dotted name such as `recurrent.layers.0.linear_u.weight`. [`ParamStore`]
//! wraps that map and adds:
//!
//! - a sorted name → tensor view ([`ParamStore::named_tensors`])
//! - seeded re-initialization for reproducible runs
//! - safetensors checkpoints with an optional `.meta.json` sidecar
//!
//! ```ignore
//! model.params().save_with_metadata(
//!     "models/trend_v1.safetensors",
//!     CheckpointMetadata::new("trend", "v1", model.config().config_hash()),
//! )?;
//!
//! let fresh = TrendModel::new(config, &device)?;
//! fresh.params().load("models/trend_v1.safetensors")?;
//! ```

use crate::{Result, TrendGraphError};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Metadata written next to a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub name: String,

    /// Free-form version string (e.g. "v1.2.0")
    pub version: String,

    /// [`crate::model::ModelConfig::config_hash`] of the model that was saved
    pub config_hash: String,

    pub trained_at: chrono::DateTime<chrono::Utc>,

    /// Filled in on save
    #[serde(default)]
    pub param_count: usize,
}

impl CheckpointMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>, config_hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            config_hash: config_hash.into(),
            trained_at: chrono::Utc::now(),
            param_count: 0,
        }
    }

    /// `model.safetensors` → `model.meta.json`
    pub fn sidecar_path(checkpoint: impl AsRef<Path>) -> PathBuf {
        checkpoint.as_ref().with_extension("meta.json")
    }
}

/// Owner of all learned tensors of one model
///
/// Cloning is shallow: clones share the same variables.
#[derive(Clone)]
pub struct ParamStore {
    varmap: VarMap,
    device: Device,
}

impl std::fmt::Debug for ParamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamStore")
            .field("device", &self.device)
            .field("param_count", &self.param_count().ok())
            .finish()
    }
}

impl ParamStore {
    pub fn new(device: &Device) -> Self {
        Self {
            varmap: VarMap::new(),
            device: device.clone(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Builder that registers new `f32` variables in this store
    pub fn var_builder(&self) -> VarBuilder<'static> {
        VarBuilder::from_varmap(&self.varmap, DType::F32, &self.device)
    }

    fn sorted_vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| TrendGraphError::Tensor("parameter store lock poisoned".into()))?;
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    /// All variables, sorted by name
    pub fn trainable_vars(&self) -> Result<Vec<Var>> {
        Ok(self.sorted_vars()?.into_iter().map(|(_, var)| var).collect())
    }

    pub fn names(&self) -> Result<Vec<String>> {
        Ok(self.sorted_vars()?.into_iter().map(|(name, _)| name).collect())
    }

    /// Total number of scalar parameters
    pub fn param_count(&self) -> Result<usize> {
        Ok(self.sorted_vars()?.iter().map(|(_, v)| v.elem_count()).sum())
    }

    /// Flat name → tensor mapping
    pub fn named_tensors(&self) -> Result<BTreeMap<String, Tensor>> {
        Ok(self
            .sorted_vars()?
            .into_iter()
            .map(|(name, var)| (name, var.as_tensor().clone()))
            .collect())
    }

    /// Overwrite every variable from a name → tensor mapping
    ///
    /// The mapping must hold exactly the store's names with matching shapes;
    /// nothing is written unless all of them check out.
    pub fn set_named_tensors(&self, tensors: &BTreeMap<String, Tensor>) -> Result<()> {
        let vars = self.sorted_vars()?;

        if let Some(extra) = tensors
            .keys()
            .find(|name| !vars.iter().any(|(known, _)| known == *name))
        {
            return Err(TrendGraphError::Serialization(format!(
                "unexpected parameter '{}'",
                extra
            )));
        }

        let mut updates = Vec::with_capacity(vars.len());
        for (name, var) in &vars {
            let tensor = tensors.get(name).ok_or_else(|| {
                TrendGraphError::Serialization(format!("missing parameter '{}'", name))
            })?;
            if tensor.dims() != var.dims() {
                return Err(TrendGraphError::ShapeMismatch(format!(
                    "parameter '{}' is {:?}, got {:?}",
                    name,
                    var.dims(),
                    tensor.dims()
                )));
            }
            let tensor = tensor
                .to_device(&self.device)
                .and_then(|t| t.to_dtype(var.dtype()))
                .map_err(|e| TrendGraphError::Tensor(format!("parameter '{}' transfer failed: {}", name, e)))?;
            updates.push((var, tensor));
        }

        for (var, tensor) in updates {
            var.set(&tensor)
                .map_err(|e| TrendGraphError::Tensor(format!("failed to set var: {}", e)))?;
        }
        Ok(())
    }

    /// Re-draw every parameter from a seeded generator
    ///
    /// Names ending in `bias` become zero; everything else is Glorot-uniform
    /// with `fan_out = dims[0]` and `fan_in` the product of the remaining
    /// dims (1 for vectors). Draws happen in sorted name order, so the same
    /// seed and layout give identical parameters on every run.
    pub fn reinitialize(&self, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);

        for (name, var) in self.sorted_vars()? {
            let dims = var.dims().to_vec();
            let count: usize = dims.iter().product();

            let values: Vec<f32> = if name.ends_with("bias") {
                vec![0.0; count]
            } else {
                let fan_out = dims.first().copied().unwrap_or(1);
                let fan_in: usize = dims.iter().skip(1).product::<usize>().max(1);
                let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
                (0..count).map(|_| rng.gen_range(-limit..=limit)).collect()
            };

            let tensor = Tensor::from_vec(values, dims.as_slice(), &self.device)?;
            var.set(&tensor)
                .map_err(|e| TrendGraphError::Tensor(format!("failed to reinit '{}': {}", name, e)))?;
        }

        debug!(seed, params = self.param_count()?, "reinitialized parameters");
        Ok(())
    }

    /// Write every parameter to a safetensors file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors: HashMap<String, Tensor> = self.named_tensors()?.into_iter().collect();
        if tensors.is_empty() {
            return Err(TrendGraphError::Serialization("no parameters to save".into()));
        }

        candle_core::safetensors::save(&tensors, path.as_ref())
            .map_err(|e| TrendGraphError::Serialization(format!("failed to save: {}", e)))?;

        info!(path = %path.as_ref().display(), tensors = tensors.len(), "saved checkpoint");
        Ok(())
    }

    /// Restore every parameter from a safetensors file written by [`Self::save`]
    pub fn load(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors = candle_core::safetensors::load(path.as_ref(), &self.device)
            .map_err(|e| TrendGraphError::Serialization(format!("failed to load: {}", e)))?;
        let tensors: BTreeMap<String, Tensor> = tensors.into_iter().collect();

        self.set_named_tensors(&tensors)?;
        info!(path = %path.as_ref().display(), tensors = tensors.len(), "loaded checkpoint");
        Ok(())
    }

    /// [`Self::save`] plus a `.meta.json` sidecar
    pub fn save_with_metadata(&self, path: impl AsRef<Path>, metadata: CheckpointMetadata) -> Result<()> {
        self.save(path.as_ref())?;

        let metadata = CheckpointMetadata {
            param_count: self.param_count()?,
            ..metadata
        };
        let json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| TrendGraphError::Serialization(format!("failed to encode metadata: {}", e)))?;
        std::fs::write(CheckpointMetadata::sidecar_path(path.as_ref()), json)?;
        Ok(())
    }

    /// Read the sidecar written by [`Self::save_with_metadata`]
    pub fn load_metadata(path: impl AsRef<Path>) -> Result<CheckpointMetadata> {
        let meta_path = CheckpointMetadata::sidecar_path(path);
        let json = std::fs::read_to_string(&meta_path).map_err(|e| {
            TrendGraphError::Serialization(format!(
                "failed to read metadata file '{}': {}",
                meta_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&json)
            .map_err(|e| TrendGraphError::Serialization(format!("invalid metadata JSON: {}", e)))
    }
}
