//! Layer abstractions for neural networks
//!
//! This module provides the Layer trait and the building blocks shared by the
//! MIL models: dense projections, layer normalization, dropout, and the depthwise
//! convolutions used for positional encoding.

mod r#trait;
pub mod conv2d;
pub mod dense;
pub mod dropout;
pub mod layernorm;

// Re-export the Layer trait for convenience
pub use conv2d::DepthwiseConv2DLayer;
pub use dense::DenseLayer;
pub use dropout::DropoutLayer;
pub use layernorm::LayerNorm;
pub use r#trait::Layer;
