//! Task heads mapping pooled bag features to predictions
//!
//! - [`ClassificationHead`]: linear classifier, argmax and softmax
//! - [`SurvivalHead`]: linear hazard layer, sigmoid hazards and the discrete
//!   survival function `S_j = prod_{i <= j} (1 - h_i)`
//! - [`TaskHead`]: the head set a model carries, fixed at construction

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::Deserialize;
use tracing::trace;

use crate::error::{ensure_len, MilError, Result};
use crate::layers::{DenseLayer, Layer};
use crate::models::outputs::{ClassificationOutput, ModelOutputs, MultitaskOutput, SurvivalOutput};
use crate::utils::activations::{argmax_rows, sigmoid_inplace, softmax_rows, survival_from_hazards};
use crate::utils::InitPolicy;

/// Prediction task a model is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TaskMode {
    /// Categorical label ('cls')
    Classification,
    /// Discrete-time survival ('surv')
    Survival,
    /// Both heads on shared features ('cls+surv')
    Multitask,
}

impl TaskMode {
    pub fn name(&self) -> &'static str {
        match self {
            TaskMode::Classification => "classification",
            TaskMode::Survival => "survival",
            TaskMode::Multitask => "multitask",
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskMode {
    type Err = MilError;

    /// Accepts '+'-separated task tokens: "cls", "surv", "cls+surv" (any order).
    fn from_str(s: &str) -> Result<Self> {
        let mut cls = false;
        let mut surv = false;
        for token in s.split('+').map(str::trim) {
            match token.to_ascii_lowercase().as_str() {
                "cls" => cls = true,
                "surv" => surv = true,
                _ => return Err(MilError::UnsupportedTask(s.to_string())),
            }
        }
        match (cls, surv) {
            (true, true) => Ok(TaskMode::Multitask),
            (true, false) => Ok(TaskMode::Classification),
            (false, true) => Ok(TaskMode::Survival),
            (false, false) => Err(MilError::UnsupportedTask(s.to_string())),
        }
    }
}

impl TryFrom<String> for TaskMode {
    type Error = MilError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Linear classifier over pooled features.
#[derive(Debug, Clone)]
pub struct ClassificationHead {
    classifier: DenseLayer,
}

impl ClassificationHead {
    pub fn new<R: Rng + ?Sized>(
        feature_dim: usize,
        n_classes: usize,
        policy: InitPolicy,
        rng: &mut R,
    ) -> Self {
        Self {
            classifier: DenseLayer::new(feature_dim, n_classes, policy, rng),
        }
    }

    pub fn from_layer(classifier: DenseLayer) -> Self {
        Self { classifier }
    }

    pub fn n_classes(&self) -> usize {
        self.classifier.output_size()
    }

    pub fn parameter_count(&self) -> usize {
        self.classifier.parameter_count()
    }

    /// Classifies `rows` feature vectors.
    pub fn forward(&self, features: Vec<f32>, rows: usize) -> Result<ClassificationOutput> {
        let feature_dim = self.classifier.input_size();
        let n_classes = self.classifier.output_size();
        ensure_len("classifier features", rows * feature_dim, features.len())?;

        let logits = self.classifier.forward_alloc(&features, rows)?;
        let y_hat = argmax_rows(&logits, rows, n_classes)?;
        let mut y_prob = logits.clone();
        softmax_rows(&mut y_prob, rows, n_classes)?;
        trace!(rows, n_classes, "classification head");

        Ok(ClassificationOutput {
            features,
            logits,
            y_hat,
            y_prob,
            rows,
            feature_dim,
            n_classes,
        })
    }
}

/// Hazard layer producing a discrete survival curve.
#[derive(Debug, Clone)]
pub struct SurvivalHead {
    hazard_layer: DenseLayer,
}

impl SurvivalHead {
    pub fn new<R: Rng + ?Sized>(
        feature_dim: usize,
        n_bins: usize,
        policy: InitPolicy,
        rng: &mut R,
    ) -> Self {
        Self {
            hazard_layer: DenseLayer::new(feature_dim, n_bins, policy, rng),
        }
    }

    pub fn from_layer(hazard_layer: DenseLayer) -> Self {
        Self { hazard_layer }
    }

    pub fn n_bins(&self) -> usize {
        self.hazard_layer.output_size()
    }

    pub fn parameter_count(&self) -> usize {
        self.hazard_layer.parameter_count()
    }

    /// Predicts hazards and survival for `rows` feature vectors.
    pub fn forward(&self, features: Vec<f32>, rows: usize) -> Result<SurvivalOutput> {
        let feature_dim = self.hazard_layer.input_size();
        let n_bins = self.hazard_layer.output_size();
        ensure_len("hazard features", rows * feature_dim, features.len())?;

        let logits = self.hazard_layer.forward_alloc(&features, rows)?;
        let y_hat = argmax_rows(&logits, rows, n_bins)?;
        let mut hazards = logits.clone();
        sigmoid_inplace(&mut hazards);
        let surv = survival_from_hazards(&hazards, rows, n_bins)?;
        trace!(rows, n_bins, "survival head");

        Ok(SurvivalOutput {
            features,
            logits,
            y_hat,
            hazards,
            surv,
            rows,
            feature_dim,
            n_bins,
        })
    }
}

/// Heads carried by a model. Chosen once when the model is built.
#[derive(Debug, Clone)]
pub enum TaskHead {
    Classification(ClassificationHead),
    Survival(SurvivalHead),
    Multitask {
        classifier: ClassificationHead,
        survival: SurvivalHead,
    },
}

impl TaskHead {
    /// Builds the heads for `mode`.
    ///
    /// `n_classes` sizes the classifier and `surv_classes` the hazard layer.
    pub fn new<R: Rng + ?Sized>(
        mode: TaskMode,
        feature_dim: usize,
        n_classes: usize,
        surv_classes: usize,
        policy: InitPolicy,
        rng: &mut R,
    ) -> Self {
        match mode {
            TaskMode::Classification => {
                TaskHead::Classification(ClassificationHead::new(feature_dim, n_classes, policy, rng))
            }
            TaskMode::Survival => {
                TaskHead::Survival(SurvivalHead::new(feature_dim, surv_classes, policy, rng))
            }
            TaskMode::Multitask => TaskHead::Multitask {
                classifier: ClassificationHead::new(feature_dim, n_classes, policy, rng),
                survival: SurvivalHead::new(feature_dim, surv_classes, policy, rng),
            },
        }
    }

    pub fn mode(&self) -> TaskMode {
        match self {
            TaskHead::Classification(_) => TaskMode::Classification,
            TaskHead::Survival(_) => TaskMode::Survival,
            TaskHead::Multitask { .. } => TaskMode::Multitask,
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            TaskHead::Classification(head) => head.parameter_count(),
            TaskHead::Survival(head) => head.parameter_count(),
            TaskHead::Multitask {
                classifier,
                survival,
            } => classifier.parameter_count() + survival.parameter_count(),
        }
    }

    /// Runs every head on the same pooled features.
    pub fn forward(&self, features: Vec<f32>, rows: usize) -> Result<ModelOutputs> {
        match self {
            TaskHead::Classification(head) => {
                head.forward(features, rows).map(ModelOutputs::Classification)
            }
            TaskHead::Survival(head) => head.forward(features, rows).map(ModelOutputs::Survival),
            TaskHead::Multitask {
                classifier,
                survival,
            } => {
                let surv = survival.forward(features.clone(), rows)?;
                let cls = classifier.forward(features, rows)?;
                Ok(ModelOutputs::Multitask(MultitaskOutput::from_parts(cls, surv)))
            }
        }
    }
}
