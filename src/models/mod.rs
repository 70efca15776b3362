//! MIL models
//!
//! - [`abmil`]: attention pooling (plain and gated)
//! - [`transmil`]: transformer encoder with Nystrom attention and PPEG
//! - [`heads`]: classification, survival and multitask heads
//! - [`outputs`]: per-task output records

pub mod abmil;
pub mod heads;
pub mod nystrom;
pub mod outputs;
pub mod ppeg;
pub mod transmil;

pub use abmil::{AttentionMil, AttentionMilConfig, PooledBag};
pub use heads::{ClassificationHead, SurvivalHead, TaskHead, TaskMode};
pub use nystrom::{NystromAttention, NystromConfig, TransLayer};
pub use outputs::{ClassificationOutput, ModelOutputs, MultitaskOutput, SurvivalOutput};
pub use ppeg::Ppeg;
pub use transmil::{TransMil, TransMilConfig};

use crate::bag::Bag;
use crate::error::Result;

/// Common interface of the MIL models.
///
/// Forward passes borrow the model immutably; dropout keeps its RNG behind a
/// `RefCell`, so models are `Send` but not `Sync`.
pub trait MilModel: std::fmt::Debug {
    /// Runs the configured task head on every bag of the batch.
    fn forward(&self, bag: &Bag) -> Result<ModelOutputs>;

    /// Task mode fixed at construction.
    fn task(&self) -> TaskMode;

    /// Toggles dropout. Models start in training mode.
    fn set_training(&mut self, training: bool);

    /// Number of learnable parameters.
    fn parameter_count(&self) -> usize;
}
