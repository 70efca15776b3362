//! Rust MIL Networks Library
//!
//! Attention-based multiple instance learning networks for bags of instance
//! embeddings (for example the patch features of a whole-slide image).
//!
//! # Modules
//!
//! - `bag`: Input bags of instance embeddings
//! - `layers`: Layer trait and building blocks (Dense, LayerNorm, Dropout, depthwise Conv2D)
//! - `models`: Attention pooling, TransMIL, task heads and outputs
//! - `utils`: Activations, matrix helpers, weight initialization
//! - `config`: JSON model configuration
//! - `architecture`: Model construction from configuration
//! - `error`: Error type shared by every module

pub mod architecture;
pub mod bag;
pub mod config;
pub mod error;
pub mod layers;
pub mod models;
pub mod utils;

pub use architecture::{build_model, load_model, ModelKind};
pub use bag::Bag;
pub use config::{load_config, ModelConfig};
pub use error::{MilError, Result};
pub use models::{MilModel, ModelOutputs, TaskMode};
