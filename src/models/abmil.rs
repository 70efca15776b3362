//! Attention-based MIL pooling (plain and gated)
//!
//! Each instance embedding is projected to `L` features, scored by a small
//! attention network, and the bag representation is the attention-weighted sum
//! of the projected instances:
//!
//! ```text
//! H = Dropout(act(X W_f + b_f))                 N × L
//! plain:  s = tanh(H V) w                       N × K
//! gated:  s = (tanh(H V) ⊙ sigmoid(H U)) w      N × K
//! A = softmax_N(sᵀ)                             K × N
//! M = A H                                       K × L
//! ```
//!
//! The softmax runs over the instance axis, independently for every attention
//! head, so pooling is invariant to the order of the instances.
//!
//! # References
//!
//! Ilse, M., Tomczak, J., & Welling, M. (2018). Attention-based Deep Multiple
//! Instance Learning. ICML.

use rand::Rng;
use tracing::{debug, info};

use crate::bag::Bag;
use crate::error::{MilError, Result};
use crate::layers::{DenseLayer, DropoutLayer, Layer};
use crate::models::heads::{ClassificationHead, TaskMode};
use crate::models::outputs::{ClassificationOutput, ModelOutputs};
use crate::models::MilModel;
use crate::utils::activations::{sigmoid_inplace, softmax_rows, tanh_inplace, Activation};
use crate::utils::matrix::{gemm, transpose};
use crate::utils::InitPolicy;

/// Dropout rate of the instance feature extractor.
pub const FEATURE_DROPOUT: f32 = 0.25;

/// Hyperparameters of an attention MIL model.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionMilConfig {
    /// Instance embedding width
    pub d_in: usize,
    pub n_classes: usize,
    /// Projected feature width L
    pub hidden_dim: usize,
    /// Attention network width D
    pub attention_dim: usize,
    /// Number of attention heads K
    pub n_heads: usize,
    pub dropout: bool,
    pub activation: Activation,
    pub init: InitPolicy,
}

impl AttentionMilConfig {
    /// Defaults: L = 512, D = 128, K = 1, dropout on, GELU, Xavier-normal init.
    pub fn new(d_in: usize, n_classes: usize) -> Self {
        Self {
            d_in,
            n_classes,
            hidden_dim: 512,
            attention_dim: 128,
            n_heads: 1,
            dropout: true,
            activation: Activation::Gelu,
            init: InitPolicy::XavierNormal,
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("d_in", self.d_in),
            ("n_classes", self.n_classes),
            ("hidden_dim", self.hidden_dim),
            ("attention_dim", self.attention_dim),
            ("n_heads", self.n_heads),
        ] {
            if value == 0 {
                return Err(MilError::InvalidConfig(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }
}

/// Network turning projected instance features into attention logits.
#[derive(Debug, Clone)]
pub enum AttentionScorer {
    /// Linear → Tanh → Linear
    Plain { hidden: DenseLayer, score: DenseLayer },
    /// (Linear → Tanh) ⊙ (Linear → Sigmoid) → Linear
    Gated {
        value: DenseLayer,
        gate: DenseLayer,
        score: DenseLayer,
    },
}

impl AttentionScorer {
    fn plain<R: Rng + ?Sized>(config: &AttentionMilConfig, rng: &mut R) -> Self {
        AttentionScorer::Plain {
            hidden: DenseLayer::new(config.hidden_dim, config.attention_dim, config.init, rng),
            score: DenseLayer::new(config.attention_dim, config.n_heads, config.init, rng),
        }
    }

    fn gated<R: Rng + ?Sized>(config: &AttentionMilConfig, rng: &mut R) -> Self {
        AttentionScorer::Gated {
            value: DenseLayer::new(config.hidden_dim, config.attention_dim, config.init, rng),
            gate: DenseLayer::new(config.hidden_dim, config.attention_dim, config.init, rng),
            score: DenseLayer::new(config.attention_dim, config.n_heads, config.init, rng),
        }
    }

    /// Attention logits for `rows` feature rows, rows × K.
    fn scores(&self, features: &[f32], rows: usize) -> Result<Vec<f32>> {
        match self {
            AttentionScorer::Plain { hidden, score } => {
                let mut h = hidden.forward_alloc(features, rows)?;
                tanh_inplace(&mut h);
                score.forward_alloc(&h, rows)
            }
            AttentionScorer::Gated { value, gate, score } => {
                let mut v = value.forward_alloc(features, rows)?;
                tanh_inplace(&mut v);
                let mut u = gate.forward_alloc(features, rows)?;
                sigmoid_inplace(&mut u);
                for (a, b) in v.iter_mut().zip(&u) {
                    *a *= b;
                }
                score.forward_alloc(&v, rows)
            }
        }
    }

    fn is_gated(&self) -> bool {
        matches!(self, AttentionScorer::Gated { .. })
    }

    fn parameter_count(&self) -> usize {
        match self {
            AttentionScorer::Plain { hidden, score } => {
                hidden.parameter_count() + score.parameter_count()
            }
            AttentionScorer::Gated { value, gate, score } => {
                value.parameter_count() + gate.parameter_count() + score.parameter_count()
            }
        }
    }
}

/// Pooled representation of a batch of bags.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledBag {
    /// batch × K × L
    pub features: Vec<f32>,
    /// Softmax-normalised weights, batch × K × N
    pub attention: Vec<f32>,
    /// Attention logits before the softmax, batch × K × N
    pub raw_attention: Vec<f32>,
    pub batch_size: usize,
    pub n_heads: usize,
    pub num_instances: usize,
    pub feature_dim: usize,
}

impl PooledBag {
    /// Attention weights of head `head` in bag `bag`.
    pub fn head_weights(&self, bag: usize, head: usize) -> &[f32] {
        let start = (bag * self.n_heads + head) * self.num_instances;
        &self.attention[start..start + self.num_instances]
    }
}

/// Attention MIL classifier (ABMIL), plain or gated.
#[derive(Debug)]
pub struct AttentionMil {
    config: AttentionMilConfig,
    feature: DenseLayer,
    dropout: Option<DropoutLayer>,
    scorer: AttentionScorer,
    head: ClassificationHead,
}

impl AttentionMil {
    /// Plain (ungated) attention pooling.
    pub fn new<R: Rng + ?Sized>(config: AttentionMilConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let feature = DenseLayer::new(config.d_in, config.hidden_dim, config.init, rng);
        let scorer = AttentionScorer::plain(&config, rng);
        Self::assemble(config, feature, scorer, rng)
    }

    /// Gated attention pooling.
    pub fn gated<R: Rng + ?Sized>(config: AttentionMilConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let feature = DenseLayer::new(config.d_in, config.hidden_dim, config.init, rng);
        let scorer = AttentionScorer::gated(&config, rng);
        Self::assemble(config, feature, scorer, rng)
    }

    fn assemble<R: Rng + ?Sized>(
        config: AttentionMilConfig,
        feature: DenseLayer,
        scorer: AttentionScorer,
        rng: &mut R,
    ) -> Result<Self> {
        let dropout = if config.dropout {
            Some(DropoutLayer::new(config.hidden_dim, FEATURE_DROPOUT, rng)?)
        } else {
            None
        };
        let head = ClassificationHead::new(
            config.hidden_dim * config.n_heads,
            config.n_classes,
            config.init,
            rng,
        );

        let model = Self {
            config,
            feature,
            dropout,
            scorer,
            head,
        };
        info!(
            gated = model.scorer.is_gated(),
            d_in = model.config.d_in,
            hidden_dim = model.config.hidden_dim,
            n_heads = model.config.n_heads,
            parameters = model.parameter_count(),
            "built attention MIL model"
        );
        Ok(model)
    }

    pub fn config(&self) -> &AttentionMilConfig {
        &self.config
    }

    pub fn is_gated(&self) -> bool {
        self.scorer.is_gated()
    }

    /// Projected instance features H, `batch × N × L`.
    pub fn project_instances(&self, bag: &Bag) -> Result<Vec<f32>> {
        if bag.d_in() != self.config.d_in {
            return Err(MilError::shape("bag embedding width", self.config.d_in, bag.d_in()));
        }
        let rows = bag.rows();
        let mut h = self.feature.forward_alloc(bag.x(), rows)?;
        self.config.activation.apply_inplace(&mut h);
        match self.dropout {
            Some(ref dropout) => dropout.forward_alloc(&h, rows),
            None => Ok(h),
        }
    }

    /// Attention-pools every bag of the batch.
    pub fn pool(&self, bag: &Bag) -> Result<PooledBag> {
        let n = bag.num_instances();
        let k = self.config.n_heads;
        let l = self.config.hidden_dim;
        let batch_size = bag.batch_size();

        let features = self.project_instances(bag)?;
        let scores = self.scorer.scores(&features, bag.rows())?;

        let mut pooled = vec![0.0f32; batch_size * k * l];
        let mut attention = Vec::with_capacity(batch_size * k * n);
        let mut raw_attention = Vec::with_capacity(batch_size * k * n);

        for b in 0..batch_size {
            let bag_scores = &scores[b * n * k..(b + 1) * n * k];
            let raw = transpose(bag_scores, n, k)?; // K × N
            let mut weights = raw.clone();
            softmax_rows(&mut weights, k, n)?;

            let bag_features = &features[b * n * l..(b + 1) * n * l];
            gemm(
                k,
                l,
                n,
                &weights,
                bag_features,
                &mut pooled[b * k * l..(b + 1) * k * l],
                false,
                false,
                1.0,
                0.0,
            )?;

            raw_attention.extend_from_slice(&raw);
            attention.extend_from_slice(&weights);
        }
        debug!(batch_size, num_instances = n, n_heads = k, "attention pooling");

        Ok(PooledBag {
            features: pooled,
            attention,
            raw_attention,
            batch_size,
            n_heads: k,
            num_instances: n,
            feature_dim: l,
        })
    }

    /// Pools each bag and classifies the flattened K × L representation.
    pub fn classify(&self, bag: &Bag) -> Result<ClassificationOutput> {
        let pooled = self.pool(bag)?;
        self.head.forward(pooled.features, pooled.batch_size)
    }
}

impl MilModel for AttentionMil {
    fn forward(&self, bag: &Bag) -> Result<ModelOutputs> {
        self.classify(bag).map(ModelOutputs::Classification)
    }

    fn task(&self) -> TaskMode {
        TaskMode::Classification
    }

    fn set_training(&mut self, training: bool) {
        if let Some(ref mut dropout) = self.dropout {
            dropout.set_training(training);
        }
    }

    fn parameter_count(&self) -> usize {
        self.feature.parameter_count() + self.scorer.parameter_count() + self.head.parameter_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> AttentionMilConfig {
        AttentionMilConfig {
            hidden_dim: 16,
            attention_dim: 8,
            dropout: false,
            activation: Activation::Relu,
            ..AttentionMilConfig::new(6, 3)
        }
    }

    fn random_bag(rng: &mut StdRng, batch: usize, n: usize, d: usize) -> Bag {
        let x = (0..batch * n * d).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Bag::new(x, batch, n, d).unwrap()
    }

    #[test]
    fn test_parameter_count_plain_and_gated() {
        let mut rng = StdRng::seed_from_u64(1);
        let plain = AttentionMil::new(small_config(), &mut rng).unwrap();
        let gated = AttentionMil::gated(small_config(), &mut rng).unwrap();

        let feature = 6 * 16 + 16;
        let hidden = 16 * 8 + 8;
        let score = 8 + 1;
        let classifier = 16 * 3 + 3;
        assert_eq!(plain.parameter_count(), feature + hidden + score + classifier);
        assert_eq!(gated.parameter_count(), feature + 2 * hidden + score + classifier);
    }

    #[test]
    fn test_raw_attention_softmaxes_to_weights() {
        let mut rng = StdRng::seed_from_u64(2);
        let model = AttentionMil::new(small_config(), &mut rng).unwrap();
        let bag = random_bag(&mut rng, 1, 5, 6);
        let pooled = model.pool(&bag).unwrap();

        let mut expected = pooled.raw_attention.clone();
        softmax_rows(&mut expected, 1, 5).unwrap();
        assert_eq!(expected, pooled.attention);
    }

    #[test]
    fn test_batched_bags_are_independent() {
        let mut rng = StdRng::seed_from_u64(3);
        let model = AttentionMil::gated(small_config(), &mut rng).unwrap();
        let batch = random_bag(&mut rng, 2, 4, 6);
        let second = Bag::new(batch.bag(1).to_vec(), 1, 4, 6).unwrap();

        let pooled_batch = model.pool(&batch).unwrap();
        let pooled_single = model.pool(&second).unwrap();
        for (a, b) in pooled_batch.features[16..].iter().zip(&pooled_single.features) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_wrong_embedding_width() {
        let mut rng = StdRng::seed_from_u64(4);
        let model = AttentionMil::new(small_config(), &mut rng).unwrap();
        let bag = random_bag(&mut rng, 1, 3, 7);
        assert!(matches!(model.pool(&bag), Err(MilError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_zero_sized_config_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let config = AttentionMilConfig {
            n_heads: 0,
            ..small_config()
        };
        assert!(AttentionMil::new(config, &mut rng).is_err());
    }
}
