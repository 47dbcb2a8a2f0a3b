//! Numeric element capability shared by kernels and backends.

use core::fmt;
use half::f16;

/// Storage precision of a tensor.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum DataType {
    F32,
    F16,
}

impl DataType {
    pub fn size_bytes(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 => 2,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::F32 => f.write_str("f32"),
            DataType::F16 => f.write_str("f16"),
        }
    }
}

/// A tensor element type the convolution kernels can be instantiated for.
pub trait Element: Copy + Default + PartialEq + Send + Sync + fmt::Debug + 'static {
    const DATA_TYPE: DataType;

    fn zero() -> Self;

    fn one() -> Self;

    fn byte_size() -> usize {
        core::mem::size_of::<Self>()
    }

    fn to_f32(self) -> f32;

    fn from_f32(v: f32) -> Self;
}

impl Element for f32 {
    const DATA_TYPE: DataType = DataType::F32;

    fn zero() -> Self {
        0.0
    }

    fn one() -> Self {
        1.0
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f16 {
    const DATA_TYPE: DataType = DataType::F16;

    fn zero() -> Self {
        f16::ZERO
    }

    fn one() -> Self {
        f16::ONE
    }

    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}
