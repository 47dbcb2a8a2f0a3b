use convdnn_ops::element::Element;

use crate::error::{ConvError, Result};

/// Dense host tensor with contiguous row-major storage.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T> {
    dims: Vec<usize>,
    data: Vec<T>,
}

impl<T: Element> Tensor<T> {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(dims: &[usize]) -> Self {
        Self {
            dims: dims.to_vec(),
            data: vec![T::zero(); dims.iter().product()],
        }
    }

    pub fn from_vec(dims: &[usize], data: Vec<T>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(ConvError::Shape(format!(
                "{} values do not fill shape {dims:?}",
                data.len()
            )));
        }
        Ok(Self {
            dims: dims.to_vec(),
            data,
        })
    }

    /// Build from `f32` values, converting to `T`.
    pub fn from_f32(dims: &[usize], values: &[f32]) -> Result<Self> {
        Self::from_vec(dims, values.iter().map(|&v| T::from_f32(v)).collect())
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn to_f32(&self) -> Vec<f32> {
        self.data.iter().map(|v| v.to_f32()).collect()
    }

    /// Change the shape. Contents are unspecified afterwards unless the
    /// element count is unchanged.
    pub fn resize(&mut self, dims: &[usize]) {
        if self.dims != dims {
            self.dims.clear();
            self.dims.extend_from_slice(dims);
            self.data.resize(dims.iter().product(), T::zero());
        }
    }

    pub fn resize_like<U>(&mut self, other: &Tensor<U>) {
        self.resize(&other.dims);
    }
}
