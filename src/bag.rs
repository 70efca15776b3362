//! Bag of instance embeddings
//!
//! A bag is the input unit of multiple instance learning: the patch-level
//! feature vectors of one slide. A [`Bag`] holds one or more bags of equal
//! size as a row-major `batch × instances × d_in` buffer (the "x" tensor of the
//! model input).

use crate::error::{ensure_len, MilError, Result};

/// A batch of equally-sized bags of instance embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct Bag {
    x: Vec<f32>,
    batch_size: usize,
    num_instances: usize,
    d_in: usize,
}

impl Bag {
    /// Wraps a `batch_size × num_instances × d_in` buffer.
    ///
    /// # Errors
    ///
    /// * [`MilError::EmptyBag`] when `num_instances` is zero
    /// * [`MilError::ShapeMismatch`] when the buffer length disagrees with the shape
    ///   or `batch_size` / `d_in` is zero
    pub fn new(x: Vec<f32>, batch_size: usize, num_instances: usize, d_in: usize) -> Result<Self> {
        if num_instances == 0 {
            return Err(MilError::EmptyBag);
        }
        if batch_size == 0 {
            return Err(MilError::shape("bag batch size", ">= 1", 0));
        }
        if d_in == 0 {
            return Err(MilError::shape("bag embedding width", ">= 1", 0));
        }
        ensure_len("bag buffer", batch_size * num_instances * d_in, x.len())?;

        Ok(Self {
            x,
            batch_size,
            num_instances,
            d_in,
        })
    }

    /// Builds a single bag from a list of instance vectors.
    pub fn from_instances(instances: &[Vec<f32>]) -> Result<Self> {
        let first = instances.first().ok_or(MilError::EmptyBag)?;
        let d_in = first.len();

        let mut x = Vec::with_capacity(instances.len() * d_in);
        for instance in instances {
            ensure_len("instance embedding", d_in, instance.len())?;
            x.extend_from_slice(instance);
        }
        Self::new(x, 1, instances.len(), d_in)
    }

    /// Flat `batch × instances × d_in` buffer.
    pub fn x(&self) -> &[f32] {
        &self.x
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_instances(&self) -> usize {
        self.num_instances
    }

    pub fn d_in(&self) -> usize {
        self.d_in
    }

    /// Total instance rows across the batch.
    pub fn rows(&self) -> usize {
        self.batch_size * self.num_instances
    }

    /// Instances of bag `index` as a `num_instances × d_in` slice.
    pub fn bag(&self, index: usize) -> &[f32] {
        let stride = self.num_instances * self.d_in;
        &self.x[index * stride..(index + 1) * stride]
    }

    /// Returns a copy with the instances of every bag reordered by `order`
    /// (`order[i]` is the source index of new position `i`).
    pub fn permuted(&self, order: &[usize]) -> Result<Self> {
        ensure_len("permutation", self.num_instances, order.len())?;
        let mut seen = vec![false; self.num_instances];
        for &i in order {
            if i >= self.num_instances || seen[i] {
                return Err(MilError::InvalidConfig(
                    "order must be a permutation of the instance indices".to_string(),
                ));
            }
            seen[i] = true;
        }

        let mut x = Vec::with_capacity(self.x.len());
        for b in 0..self.batch_size {
            let bag = self.bag(b);
            for &src in order {
                x.extend_from_slice(&bag[src * self.d_in..(src + 1) * self.d_in]);
            }
        }
        Self::new(x, self.batch_size, self.num_instances, self.d_in)
    }
}
