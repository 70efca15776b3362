//! Model construction from configuration
//!
//! Turns a validated [`ModelConfig`] into a ready-to-run model behind the
//! [`MilModel`] trait. Construction is reproducible: all weights and dropout
//! masks are drawn from a `StdRng` seeded with `config.seed`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::config::{load_config, validate_config, ModelConfig};
use crate::error::{MilError, Result};
use crate::models::{AttentionMil, AttentionMilConfig, MilModel, TransMil, TransMilConfig};
use crate::utils::Activation;

/// Supported model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Attention pooling (Linear → Tanh → Linear scorer)
    Abmil,
    /// Gated attention pooling
    GatedAbmil,
    /// Transformer encoder with Nystrom attention
    TransMil,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Abmil => "abmil",
            ModelKind::GatedAbmil => "gated_abmil",
            ModelKind::TransMil => "transmil",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = MilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abmil" => Ok(ModelKind::Abmil),
            "gated_abmil" => Ok(ModelKind::GatedAbmil),
            "transmil" => Ok(ModelKind::TransMil),
            other => Err(MilError::InvalidConfig(format!("Unknown model type: {}", other))),
        }
    }
}

fn attention_config(config: &ModelConfig) -> AttentionMilConfig {
    AttentionMilConfig {
        d_in: config.d_in,
        n_classes: config.n_classes,
        hidden_dim: config.d_model,
        attention_dim: config.attention_dim,
        n_heads: config.n_heads,
        dropout: config.dropout,
        activation: Activation::from_name(&config.activation),
        init: config.init,
    }
}

fn transmil_config(config: &ModelConfig) -> TransMilConfig {
    TransMilConfig {
        d_in: config.d_in,
        d_model: config.d_model,
        n_classes: config.n_classes,
        surv_classes: config.surv_classes,
        task: config.task,
        dropout: config.dropout,
        init: config.init,
    }
}

/// Builds the model described by `config`.
///
/// # Errors
///
/// [`MilError::InvalidConfig`] when the configuration fails validation.
pub fn build_model(config: &ModelConfig) -> Result<Box<dyn MilModel>> {
    validate_config(config)?;
    let kind: ModelKind = config.model_type.parse()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    info!(kind = %kind, seed = config.seed, "building model");

    let model: Box<dyn MilModel> = match kind {
        ModelKind::Abmil => Box::new(AttentionMil::new(attention_config(config), &mut rng)?),
        ModelKind::GatedAbmil => Box::new(AttentionMil::gated(attention_config(config), &mut rng)?),
        ModelKind::TransMil => Box::new(TransMil::new(transmil_config(config), &mut rng)?),
    };
    Ok(model)
}

/// Loads a JSON configuration and builds its model.
///
/// # Examples
///
/// ```no_run
/// use rust_mil_networks::architecture::load_model;
/// use rust_mil_networks::MilModel;
///
/// let model = load_model("config/abmil_relu.json").unwrap();
/// println!("{} parameters", model.parameter_count());
/// ```
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Box<dyn MilModel>> {
    let config = load_config(path)?;
    build_model(&config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskMode;

    fn small(model_type: &str) -> ModelConfig {
        ModelConfig {
            d_model: 16,
            attention_dim: 8,
            ..ModelConfig::new(model_type, 6, 3)
        }
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("abmil".parse::<ModelKind>().unwrap(), ModelKind::Abmil);
        assert_eq!("Gated_ABMIL".parse::<ModelKind>().unwrap(), ModelKind::GatedAbmil);
        assert_eq!("transmil".parse::<ModelKind>().unwrap(), ModelKind::TransMil);
        assert!("clam".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_build_each_kind() {
        for name in ["abmil", "gated_abmil", "transmil"] {
            let model = build_model(&small(name)).unwrap();
            assert_eq!(model.task(), TaskMode::Classification);
            assert!(model.parameter_count() > 0);
        }
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let mut a = build_model(&small("gated_abmil")).unwrap();
        let mut b = build_model(&small("gated_abmil")).unwrap();
        a.set_training(false);
        b.set_training(false);

        let bag = crate::bag::Bag::new(vec![0.5; 3 * 6], 1, 3, 6).unwrap();
        assert_eq!(a.forward(&bag).unwrap(), b.forward(&bag).unwrap());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = small("abmil");
        config.task = TaskMode::Multitask;
        assert!(matches!(build_model(&config), Err(MilError::InvalidConfig(_))));
    }
}
