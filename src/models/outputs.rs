//! Model output envelopes
//!
//! Each task mode has its own output record with a fixed, fully-populated set of
//! fields. [`ModelOutputs`] tags which one a forward pass produced.
//!
//! All matrices are row-major flat buffers with one row per bag.

use crate::models::heads::TaskMode;

/// Output of a classification head.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationOutput {
    /// Pooled bag features, rows × feature_dim
    pub features: Vec<f32>,
    /// Raw class scores, rows × n_classes
    pub logits: Vec<f32>,
    /// Predicted class per row
    pub y_hat: Vec<usize>,
    /// Class probabilities, rows × n_classes
    pub y_prob: Vec<f32>,
    pub rows: usize,
    pub feature_dim: usize,
    pub n_classes: usize,
}

/// Output of a discrete-time survival head.
#[derive(Debug, Clone, PartialEq)]
pub struct SurvivalOutput {
    /// Pooled bag features, rows × feature_dim
    pub features: Vec<f32>,
    /// Raw hazard logits, rows × n_bins
    pub logits: Vec<f32>,
    /// Bin with the highest hazard logit per row
    pub y_hat: Vec<usize>,
    /// Per-bin event probability, rows × n_bins
    pub hazards: Vec<f32>,
    /// Survival function, rows × n_bins, non-increasing along each row
    pub surv: Vec<f32>,
    pub rows: usize,
    pub feature_dim: usize,
    pub n_bins: usize,
}

/// Output of a model running classification and survival heads together.
#[derive(Debug, Clone, PartialEq)]
pub struct MultitaskOutput {
    pub features: Vec<f32>,
    pub cls_logits: Vec<f32>,
    pub y_hat: Vec<usize>,
    pub y_prob: Vec<f32>,
    pub surv_logits: Vec<f32>,
    pub surv_y_hat: Vec<usize>,
    pub hazards: Vec<f32>,
    pub surv: Vec<f32>,
    pub rows: usize,
    pub feature_dim: usize,
    pub n_classes: usize,
    pub n_bins: usize,
}

impl MultitaskOutput {
    /// Joins the two single-task outputs computed on the same features.
    pub fn from_parts(cls: ClassificationOutput, surv: SurvivalOutput) -> Self {
        Self {
            features: cls.features,
            cls_logits: cls.logits,
            y_hat: cls.y_hat,
            y_prob: cls.y_prob,
            surv_logits: surv.logits,
            surv_y_hat: surv.y_hat,
            hazards: surv.hazards,
            surv: surv.surv,
            rows: cls.rows,
            feature_dim: cls.feature_dim,
            n_classes: cls.n_classes,
            n_bins: surv.n_bins,
        }
    }
}

/// Result of a forward pass, tagged by task mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutputs {
    Classification(ClassificationOutput),
    Survival(SurvivalOutput),
    Multitask(MultitaskOutput),
}

impl ModelOutputs {
    /// Task mode that produced this output.
    pub fn task(&self) -> TaskMode {
        match self {
            ModelOutputs::Classification(_) => TaskMode::Classification,
            ModelOutputs::Survival(_) => TaskMode::Survival,
            ModelOutputs::Multitask(_) => TaskMode::Multitask,
        }
    }

    /// Pooled features shared by every variant.
    pub fn features(&self) -> &[f32] {
        match self {
            ModelOutputs::Classification(out) => &out.features,
            ModelOutputs::Survival(out) => &out.features,
            ModelOutputs::Multitask(out) => &out.features,
        }
    }

    pub fn as_classification(&self) -> Option<&ClassificationOutput> {
        match self {
            ModelOutputs::Classification(out) => Some(out),
            _ => None,
        }
    }

    pub fn as_survival(&self) -> Option<&SurvivalOutput> {
        match self {
            ModelOutputs::Survival(out) => Some(out),
            _ => None,
        }
    }

    pub fn as_multitask(&self) -> Option<&MultitaskOutput> {
        match self {
            ModelOutputs::Multitask(out) => Some(out),
            _ => None,
        }
    }
}
