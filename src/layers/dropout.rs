//! Dropout layer implementation for regularization
//!
//! This module provides a DropoutLayer that randomly drops (sets to zero) a fraction
//! of input units during training to prevent overfitting. During inference, all units
//! are kept and outputs are passed through unchanged.

use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ensure_len, MilError, Result};
use crate::layers::Layer;

/// Dropout layer for regularization.
///
/// During training, randomly sets a fraction of input units to zero with probability
/// `drop_rate`, and scales the remaining units by 1/(1-drop_rate) to maintain expected
/// values. During inference, passes inputs through unchanged.
///
/// The layer owns its random stream behind a `RefCell` so that `forward` can take
/// `&self`; the stream is seeded from the RNG passed at construction.
#[derive(Debug)]
pub struct DropoutLayer {
    size: usize,
    drop_rate: f32,
    training: bool,
    rng: RefCell<StdRng>,
}

impl DropoutLayer {
    /// Creates a new dropout layer with specified size and drop rate.
    ///
    /// The layer starts in training mode.
    ///
    /// # Errors
    ///
    /// Returns [`MilError::InvalidConfig`] unless `drop_rate` lies in [0.0, 1.0).
    pub fn new<R: Rng + ?Sized>(size: usize, drop_rate: f32, rng: &mut R) -> Result<Self> {
        if !(0.0..1.0).contains(&drop_rate) {
            return Err(MilError::InvalidConfig(format!(
                "drop_rate must be in range [0.0, 1.0), got {}",
                drop_rate
            )));
        }

        Ok(Self {
            size,
            drop_rate,
            training: true,
            rng: RefCell::new(StdRng::seed_from_u64(rng.gen())),
        })
    }

    /// Get whether the layer is in training mode.
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Get the dropout rate.
    pub fn drop_rate(&self) -> f32 {
        self.drop_rate
    }
}

impl Layer for DropoutLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) -> Result<()> {
        let total_size = batch_size * self.size;
        ensure_len("dropout input", total_size, input.len())?;
        ensure_len("dropout output", total_size, output.len())?;

        if !self.training || self.drop_rate == 0.0 {
            // Inference mode: pass through unchanged
            output.copy_from_slice(input);
            return Ok(());
        }

        let scale = 1.0 / (1.0 - self.drop_rate);
        let mut rng = self.rng.borrow_mut();
        for (out, &value) in output.iter_mut().zip(input) {
            *out = if rng.gen::<f32>() < self.drop_rate {
                0.0
            } else {
                value * scale
            };
        }
        Ok(())
    }

    fn input_size(&self) -> usize {
        self.size
    }

    fn output_size(&self) -> usize {
        self.size
    }

    /// Dropout has no trainable parameters.
    fn parameter_count(&self) -> usize {
        0
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }
}
