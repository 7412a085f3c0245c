//! Tensor shapes and dense tensors
//!
//! Tensors are stored row-major with the channel index varying fastest, so the
//! value at `(row, column, channel)` lives at
//! `(row * columns + column) * channels + channel`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::EllError;

/// Dimensions of a tensor as a (rows, columns, channels) triple
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    pub rows: usize,
    pub columns: usize,
    pub channels: usize,
}

impl TensorShape {
    /// Creates a new shape
    pub fn new(rows: usize, columns: usize, channels: usize) -> Self {
        Self { rows, columns, channels }
    }

    /// Total number of values a tensor of this shape holds
    ///
    /// Shapes coming from untrusted input should go through
    /// [`TensorShape::checked_size`] first.
    pub fn size(&self) -> usize {
        self.rows * self.columns * self.channels
    }

    /// Total number of values, or `None` when it overflows `usize`
    pub fn checked_size(&self) -> Option<usize> {
        self.rows.checked_mul(self.columns)?.checked_mul(self.channels)
    }

    /// Flat offset of `(row, column, channel)`
    pub fn offset(&self, row: usize, column: usize, channel: usize) -> usize {
        (row * self.columns + column) * self.channels + channel
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.rows, self.columns, self.channels)
    }
}

/// A dense three dimensional tensor of `f32` values
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl Tensor {
    /// Creates a zero-filled tensor
    pub fn zeros(shape: TensorShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.size()],
        }
    }

    /// Wraps existing data, checking that its length matches the shape
    pub fn from_vec(shape: TensorShape, data: Vec<f32>) -> Result<Self, EllError> {
        if data.len() != shape.size() {
            return Err(EllError::InputSize {
                shape,
                expected: shape.size(),
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> TensorShape {
        self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn get(&self, row: usize, column: usize, channel: usize) -> f32 {
        self.data[self.shape.offset(row, column, channel)]
    }

    pub fn set(&mut self, row: usize, column: usize, channel: usize, value: f32) {
        let offset = self.shape.offset(row, column, channel);
        self.data[offset] = value;
    }

    /// Returns the values in channel-major (planar) order
    ///
    /// This is the order Darknet uses when it flattens a feature map, e.g. as the
    /// input of a fully connected layer.
    pub fn to_planar(&self) -> Vec<f32> {
        let TensorShape { rows, columns, channels } = self.shape;
        let mut planar = Vec::with_capacity(self.data.len());
        for channel in 0..channels {
            for row in 0..rows {
                for column in 0..columns {
                    planar.push(self.get(row, column, channel));
                }
            }
        }
        planar
    }
}
