//! Model configuration
//!
//! Models are described by small JSON files so experiments can switch
//! architecture, task and sizes without code changes.
//!
//! # Example
//!
//! ```json
//! {
//!   "model_type": "transmil",
//!   "d_in": 1024,
//!   "n_classes": 4,
//!   "task": "surv",
//!   "d_model": 512
//! }
//! ```

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{MilError, Result};
use crate::models::TaskMode;
use crate::utils::InitPolicy;

/// Model types accepted in `model_type`.
pub const MODEL_TYPES: [&str; 3] = ["abmil", "gated_abmil", "transmil"];

/// Activation names accepted in `activation`.
pub const ACTIVATIONS: [&str; 2] = ["gelu", "relu"];

fn default_task() -> TaskMode {
    TaskMode::Classification
}

fn default_d_model() -> usize {
    512
}

fn default_attention_dim() -> usize {
    128
}

fn default_n_heads() -> usize {
    1
}

fn default_surv_classes() -> usize {
    4
}

fn default_dropout() -> bool {
    true
}

fn default_activation() -> String {
    "gelu".to_string()
}

fn default_seed() -> u64 {
    42
}

/// Configuration of a MIL model.
///
/// Only `model_type`, `d_in` and `n_classes` are required.
///
/// - **abmil** / **gated_abmil**: use `d_model` as the projected width L,
///   `attention_dim` (D), `n_heads` (K), `activation` and `dropout`
/// - **transmil**: uses `d_model`, `task`, `surv_classes` and `dropout`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// "abmil", "gated_abmil" or "transmil"
    pub model_type: String,

    /// Width of the instance embeddings
    pub d_in: usize,

    pub n_classes: usize,

    /// "cls", "surv" or "cls+surv" (default "cls")
    #[serde(default = "default_task")]
    pub task: TaskMode,

    /// Hidden width (default 512)
    #[serde(default = "default_d_model")]
    pub d_model: usize,

    /// Attention network width for attention pooling (default 128)
    #[serde(default = "default_attention_dim")]
    pub attention_dim: usize,

    /// Attention heads for attention pooling (default 1)
    #[serde(default = "default_n_heads")]
    pub n_heads: usize,

    /// Survival bins (default 4)
    #[serde(default = "default_surv_classes")]
    pub surv_classes: usize,

    #[serde(default = "default_dropout")]
    pub dropout: bool,

    /// "gelu" or "relu" (default "gelu")
    #[serde(default = "default_activation")]
    pub activation: String,

    #[serde(default)]
    pub init: InitPolicy,

    /// Seed for weight initialization and dropout masks
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl ModelConfig {
    /// A configuration with every optional field at its default.
    pub fn new(model_type: &str, d_in: usize, n_classes: usize) -> Self {
        Self {
            model_type: model_type.to_string(),
            d_in,
            n_classes,
            task: default_task(),
            d_model: default_d_model(),
            attention_dim: default_attention_dim(),
            n_heads: default_n_heads(),
            surv_classes: default_surv_classes(),
            dropout: default_dropout(),
            activation: default_activation(),
            init: InitPolicy::default(),
            seed: default_seed(),
        }
    }
}

/// Loads and validates a model configuration from a JSON file.
///
/// # Examples
///
/// ```no_run
/// use rust_mil_networks::config::load_config;
///
/// let cfg = load_config("config/transmil_surv.json").unwrap();
/// assert_eq!(cfg.model_type, "transmil");
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ModelConfig> {
    let contents = fs::read_to_string(path)?;
    let config: ModelConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks sizes, names and the task / model combination.
pub fn validate_config(config: &ModelConfig) -> Result<()> {
    let model_type = config.model_type.to_lowercase();
    if !MODEL_TYPES.contains(&model_type.as_str()) {
        return Err(MilError::InvalidConfig(format!(
            "Invalid model_type '{}'. Must be one of: {}",
            config.model_type,
            MODEL_TYPES.join(", ")
        )));
    }

    for (name, value) in [
        ("d_in", config.d_in),
        ("n_classes", config.n_classes),
        ("d_model", config.d_model),
        ("attention_dim", config.attention_dim),
        ("n_heads", config.n_heads),
        ("surv_classes", config.surv_classes),
    ] {
        if value == 0 {
            return Err(MilError::InvalidConfig(format!("{} must be greater than 0", name)));
        }
    }

    let activation = config.activation.to_lowercase();
    if !ACTIVATIONS.contains(&activation.as_str()) {
        return Err(MilError::InvalidConfig(format!(
            "Invalid activation '{}'. Must be one of: {}",
            config.activation,
            ACTIVATIONS.join(", ")
        )));
    }

    if model_type == "transmil" {
        if config.d_model % 8 != 0 {
            return Err(MilError::InvalidConfig(format!(
                "transmil d_model must be divisible by 8, got {}",
                config.d_model
            )));
        }
    } else if config.task != TaskMode::Classification {
        return Err(MilError::InvalidConfig(format!(
            "{} supports classification only, got task {}",
            config.model_type, config.task
        )));
    }

    Ok(())
}
