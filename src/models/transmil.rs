//! TransMIL: transformer-based correlated multiple instance learning
//!
//! Pipeline for a bag of `N` instance embeddings:
//!
//! 1. `Linear(d_in → d_model) + ReLU`
//! 2. Square padding: `s = ceil(sqrt(N))`, the first `s² − N` instances are
//!    appended again so the tokens fill an `s × s` grid
//! 3. A learned aggregation (cls) token is prepended
//! 4. TransLayer → PPEG(s, s) → TransLayer → LayerNorm
//! 5. The normalised aggregation token is the bag representation, fed to the
//!    task head
//!
//! # References
//!
//! Shao, Z. et al. (2021). TransMIL: Transformer based Correlated Multiple
//! Instance Learning for Whole Slide Image Classification. NeurIPS.

use rand::Rng;
use tracing::{debug, info, trace};

use crate::bag::Bag;
use crate::error::{MilError, Result};
use crate::layers::{DenseLayer, Layer, LayerNorm};
use crate::models::heads::{TaskHead, TaskMode};
use crate::models::nystrom::{NystromConfig, TransLayer};
use crate::models::outputs::{ClassificationOutput, ModelOutputs, MultitaskOutput, SurvivalOutput};
use crate::models::ppeg::Ppeg;
use crate::models::MilModel;
use crate::utils::activations::relu_inplace;
use crate::utils::init::standard_normal;
use crate::utils::InitPolicy;

/// Hyperparameters of a [`TransMil`] model.
#[derive(Debug, Clone, PartialEq)]
pub struct TransMilConfig {
    pub d_in: usize,
    /// Token width; must be divisible by 8 (one eighth per attention head)
    pub d_model: usize,
    pub n_classes: usize,
    /// Number of discrete survival bins
    pub surv_classes: usize,
    pub task: TaskMode,
    /// Dropout inside the attention blocks
    pub dropout: bool,
    pub init: InitPolicy,
}

impl TransMilConfig {
    pub fn new(d_in: usize, n_classes: usize, task: TaskMode) -> Self {
        Self {
            d_in,
            d_model: 512,
            n_classes,
            surv_classes: 4,
            task,
            dropout: true,
            init: InitPolicy::XavierNormal,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.d_in == 0 || self.n_classes == 0 || self.surv_classes == 0 {
            return Err(MilError::InvalidConfig(
                "d_in, n_classes and surv_classes must be greater than 0".to_string(),
            ));
        }
        if self.d_model < 8 || self.d_model % 8 != 0 {
            return Err(MilError::InvalidConfig(format!(
                "d_model must be a positive multiple of 8, got {}",
                self.d_model
            )));
        }
        Ok(())
    }

    fn attention(&self) -> NystromConfig {
        NystromConfig {
            dropout: if self.dropout { 0.1 } else { 0.0 },
            ..NystromConfig::for_dim(self.d_model)
        }
    }
}

/// Side of the smallest square grid holding `n` tokens, `ceil(sqrt(n))`.
pub fn grid_side(n: usize) -> usize {
    let mut side = (n as f64).sqrt() as usize;
    while side * side < n {
        side += 1;
    }
    while side > 0 && (side - 1) * (side - 1) >= n {
        side -= 1;
    }
    side
}

/// TransMIL bag encoder with its task head.
#[derive(Debug)]
pub struct TransMil {
    config: TransMilConfig,
    fc1: DenseLayer,
    cls_token: Vec<f32>,
    layer1: TransLayer,
    pos_layer: Ppeg,
    layer2: TransLayer,
    norm: LayerNorm,
    head: TaskHead,
}

impl TransMil {
    pub fn new<R: Rng + ?Sized>(config: TransMilConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let d = config.d_model;

        let fc1 = DenseLayer::new(config.d_in, d, config.init, rng);
        let cls_token = standard_normal(d, rng);
        let layer1 = TransLayer::new(config.attention(), config.init, rng)?;
        let pos_layer = Ppeg::new(d, rng)?;
        let layer2 = TransLayer::new(config.attention(), config.init, rng)?;
        let head = TaskHead::new(
            config.task,
            d,
            config.n_classes,
            config.surv_classes,
            config.init,
            rng,
        );

        let model = Self {
            fc1,
            cls_token,
            layer1,
            pos_layer,
            layer2,
            norm: LayerNorm::new(d),
            head,
            config,
        };
        info!(
            task = %model.config.task,
            d_in = model.config.d_in,
            d_model = d,
            parameters = model.parameter_count(),
            "built TransMIL model"
        );
        Ok(model)
    }

    pub fn config(&self) -> &TransMilConfig {
        &self.config
    }

    /// Learned aggregation token.
    pub fn cls_token(&self) -> &[f32] {
        &self.cls_token
    }

    /// Bag representations, `batch × d_model`. Independent of the task mode.
    pub fn encode(&self, bag: &Bag) -> Result<Vec<f32>> {
        if bag.d_in() != self.config.d_in {
            return Err(MilError::shape("bag embedding width", self.config.d_in, bag.d_in()));
        }
        let d = self.config.d_model;
        let n = bag.num_instances();
        let batch_size = bag.batch_size();

        let mut h = self.fc1.forward_alloc(bag.x(), bag.rows())?;
        relu_inplace(&mut h);

        let side = grid_side(n);
        let padding = side * side - n;
        let seq_len = 1 + side * side;
        debug!(batch_size, num_instances = n, side, padding, "TransMIL encode");

        let mut tokens = Vec::with_capacity(batch_size * seq_len * d);
        for instances in h.chunks(n * d) {
            tokens.extend_from_slice(&self.cls_token);
            tokens.extend_from_slice(instances);
            for i in 0..padding {
                let src = i % n;
                tokens.extend_from_slice(&instances[src * d..(src + 1) * d]);
            }
        }

        let tokens = self.layer1.forward(&tokens, batch_size, seq_len)?;
        let tokens = self.pos_layer.forward(&tokens, batch_size, seq_len, side, side)?;
        let tokens = self.layer2.forward(&tokens, batch_size, seq_len)?;
        trace!(batch_size, seq_len, d_model = d, "TransMIL tokens");

        let cls_rows: Vec<f32> = tokens
            .chunks(seq_len * d)
            .flat_map(|sequence| sequence[..d].iter().copied())
            .collect();
        self.norm.forward_alloc(&cls_rows, batch_size)
    }

    fn mismatch(&self, requested: TaskMode) -> MilError {
        MilError::TaskMismatch {
            configured: self.head.mode().name(),
            requested: requested.name(),
        }
    }

    /// Classification forward pass.
    ///
    /// # Errors
    ///
    /// [`MilError::TaskMismatch`] unless the model was built for classification.
    pub fn classify(&self, bag: &Bag) -> Result<ClassificationOutput> {
        let TaskHead::Classification(ref head) = self.head else {
            return Err(self.mismatch(TaskMode::Classification));
        };
        head.forward(self.encode(bag)?, bag.batch_size())
    }

    /// Survival forward pass.
    ///
    /// # Errors
    ///
    /// [`MilError::TaskMismatch`] unless the model was built for survival.
    pub fn predict_survival(&self, bag: &Bag) -> Result<SurvivalOutput> {
        let TaskHead::Survival(ref head) = self.head else {
            return Err(self.mismatch(TaskMode::Survival));
        };
        head.forward(self.encode(bag)?, bag.batch_size())
    }

    /// Joint classification and survival forward pass.
    ///
    /// # Errors
    ///
    /// [`MilError::TaskMismatch`] unless the model was built for both tasks.
    pub fn predict_multitask(&self, bag: &Bag) -> Result<MultitaskOutput> {
        let TaskHead::Multitask {
            ref classifier,
            ref survival,
        } = self.head
        else {
            return Err(self.mismatch(TaskMode::Multitask));
        };
        let features = self.encode(bag)?;
        let rows = bag.batch_size();
        let surv = survival.forward(features.clone(), rows)?;
        let cls = classifier.forward(features, rows)?;
        Ok(MultitaskOutput::from_parts(cls, surv))
    }
}

impl MilModel for TransMil {
    fn forward(&self, bag: &Bag) -> Result<ModelOutputs> {
        let features = self.encode(bag)?;
        self.head.forward(features, bag.batch_size())
    }

    fn task(&self) -> TaskMode {
        self.head.mode()
    }

    fn set_training(&mut self, training: bool) {
        self.layer1.set_training(training);
        self.layer2.set_training(training);
    }

    fn parameter_count(&self) -> usize {
        self.fc1.parameter_count()
            + self.cls_token.len()
            + self.layer1.parameter_count()
            + self.pos_layer.parameter_count()
            + self.layer2.parameter_count()
            + self.norm.parameter_count()
            + self.head.parameter_count()
    }
}
