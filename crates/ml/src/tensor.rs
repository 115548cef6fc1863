use serde::{Deserialize, Serialize};

use crate::{MlError, Result};

/// Dense row-major `f32` buffer with an explicit shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
}

impl Tensor {
    /// Panics when `shape` does not describe `data.len()` elements.
    pub fn from_vec(shape: Vec<usize>, data: Vec<f32>) -> Self {
        assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { data, shape }
    }

    /// Fallible counterpart of [`Tensor::from_vec`] for untrusted input.
    pub fn try_from_vec(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        match shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d)) {
            Some(expected) if expected == data.len() => Ok(Self { data, shape }),
            Some(expected) => Err(MlError::ShapeMismatch(format!(
                "shape {shape:?} holds {expected} elements, got {}",
                data.len()
            ))),
            None => Err(MlError::ShapeMismatch(format!("shape {shape:?} overflows usize"))),
        }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self { data: vec![0.0; len], shape }
    }

    /// One-dimensional tensor over a slice.
    pub fn vector(data: &[f32]) -> Self {
        Self { data: data.to_vec(), shape: vec![data.len()] }
    }

    #[must_use]
    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `self += scale * other`, elementwise.
    pub fn add_scaled(&mut self, other: &Tensor, scale: f32) {
        debug_assert_eq!(self.shape, other.shape);
        for (s, o) in self.data.iter_mut().zip(&other.data) {
            *s += scale * o;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.data {
            *v *= factor;
        }
    }

    pub fn sum_squares(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum()
    }
}
