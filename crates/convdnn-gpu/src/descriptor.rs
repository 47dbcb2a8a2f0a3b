//! Problem descriptors consumed by backend compute calls.
//!
//! Descriptors are plain values. Building one never touches the device, so a
//! caller can rebuild any subset of them when a shape changes.

use convdnn_ops::element::DataType;
use convdnn_ops::geometry::{output_extent, ConvGeometry};
use convdnn_util::basics::StorageOrder;

use crate::backend::{BackendError, Result};

/// Shape, layout and precision of a 4-D activation tensor.
///
/// Extents are stored logically (`n`, `c`, `h`, `w`) regardless of `order`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TensorDescriptor {
    pub order: StorageOrder,
    pub dtype: DataType,
    pub n: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl TensorDescriptor {
    pub fn new(
        order: StorageOrder,
        dtype: DataType,
        n: usize,
        c: usize,
        h: usize,
        w: usize,
    ) -> Self {
        Self {
            order,
            dtype,
            n,
            c,
            h,
            w,
        }
    }

    /// Descriptor for a tensor whose dims are given in storage order.
    pub fn from_dims(order: StorageOrder, dtype: DataType, dims: &[usize]) -> Result<Self> {
        let [a, b, c, d] = four_dims(dims, "tensor")?;
        Ok(match order {
            StorageOrder::Nchw => Self::new(order, dtype, a, b, c, d),
            StorageOrder::Nhwc => Self::new(order, dtype, a, d, b, c),
        })
    }

    /// A `(1, channels, 1, 1)` tensor broadcast over batch and space.
    pub fn bias(order: StorageOrder, dtype: DataType, channels: usize) -> Self {
        Self::new(order, dtype, 1, channels, 1, 1)
    }

    /// Dims in storage order.
    pub fn dims(&self) -> [usize; 4] {
        match self.order {
            StorageOrder::Nchw => [self.n, self.c, self.h, self.w],
            StorageOrder::Nhwc => [self.n, self.h, self.w, self.c],
        }
    }

    pub fn len(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len() * self.dtype.size_bytes()
    }
}

/// Shape, layout and precision of a convolution filter.
///
/// `k` is the number of output channels, `c` the number of input channels.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FilterDescriptor {
    pub order: StorageOrder,
    pub dtype: DataType,
    pub k: usize,
    pub c: usize,
    pub h: usize,
    pub w: usize,
}

impl FilterDescriptor {
    /// Descriptor for a filter whose dims are given in storage order:
    /// `(M, C, kh, kw)` for NCHW, `(M, kh, kw, C)` for NHWC.
    pub fn from_dims(order: StorageOrder, dtype: DataType, dims: &[usize]) -> Result<Self> {
        let [a, b, c, d] = four_dims(dims, "filter")?;
        let (k, c, h, w) = match order {
            StorageOrder::Nchw => (a, b, c, d),
            StorageOrder::Nhwc => (a, d, b, c),
        };
        Ok(Self {
            order,
            dtype,
            k,
            c,
            h,
            w,
        })
    }

    pub fn dims(&self) -> [usize; 4] {
        match self.order {
            StorageOrder::Nchw => [self.k, self.c, self.h, self.w],
            StorageOrder::Nhwc => [self.k, self.h, self.w, self.c],
        }
    }

    pub fn len(&self) -> usize {
        self.k * self.c * self.h * self.w
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How the filter is applied. Only cross-correlation is supported.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ConvolutionMode {
    #[default]
    CrossCorrelation,
}

/// Padding, stride and dilation of a 2-D convolution.
///
/// Padding is symmetric per axis; dilation is always 1.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConvolutionDescriptor {
    pub pad_h: usize,
    pub pad_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub mode: ConvolutionMode,
    /// Precision of accumulation. The CPU backend always accumulates in f32.
    pub compute_type: DataType,
}

impl ConvolutionDescriptor {
    pub fn new(pad_h: usize, pad_w: usize, stride_h: usize, stride_w: usize) -> Result<Self> {
        if stride_h == 0 || stride_w == 0 {
            return Err(BackendError::BadParam(format!(
                "stride must be positive, got {stride_h}x{stride_w}"
            )));
        }
        Ok(Self {
            pad_h,
            pad_w,
            stride_h,
            stride_w,
            dilation_h: 1,
            dilation_w: 1,
            mode: ConvolutionMode::CrossCorrelation,
            compute_type: DataType::F32,
        })
    }

    /// Output descriptor for `input` convolved with `filter`.
    pub fn output_descriptor(
        &self,
        input: &TensorDescriptor,
        filter: &FilterDescriptor,
    ) -> Result<TensorDescriptor> {
        if input.c != filter.c {
            return Err(BackendError::BadParam(format!(
                "input has {} channels but filter expects {}",
                input.c, filter.c
            )));
        }
        let out_h = output_extent(input.h, filter.h, self.stride_h, self.pad_h, self.pad_h);
        let out_w = output_extent(input.w, filter.w, self.stride_w, self.pad_w, self.pad_w);
        match (out_h, out_w) {
            (Some(h), Some(w)) => Ok(TensorDescriptor::new(
                input.order,
                input.dtype,
                input.n,
                filter.k,
                h,
                w,
            )),
            _ => Err(BackendError::BadParam(format!(
                "{}x{} filter does not fit {}x{} input with padding {}x{}",
                filter.h, filter.w, input.h, input.w, self.pad_h, self.pad_w
            ))),
        }
    }
}

/// Everything a backend needs to run one convolution.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConvProblem {
    pub input: TensorDescriptor,
    pub filter: FilterDescriptor,
    pub output: TensorDescriptor,
    pub conv: ConvolutionDescriptor,
}

impl ConvProblem {
    pub fn new(
        input: TensorDescriptor,
        filter: FilterDescriptor,
        conv: ConvolutionDescriptor,
    ) -> Result<Self> {
        if input.order != filter.order {
            return Err(BackendError::BadParam(format!(
                "input layout {} does not match filter layout {}",
                input.order, filter.order
            )));
        }
        if input.dtype != filter.dtype {
            return Err(BackendError::BadParam(format!(
                "input type {} does not match filter type {}",
                input.dtype, filter.dtype
            )));
        }
        let output = conv.output_descriptor(&input, &filter)?;
        Ok(Self {
            input,
            filter,
            output,
            conv,
        })
    }

    pub fn dtype(&self) -> DataType {
        self.input.dtype
    }

    /// Index arithmetic for the reference kernels.
    pub fn geometry(&self) -> ConvGeometry {
        ConvGeometry {
            order: self.input.order,
            batch: self.input.n,
            in_channels: self.input.c,
            in_h: self.input.h,
            in_w: self.input.w,
            out_channels: self.filter.k,
            kernel_h: self.filter.h,
            kernel_w: self.filter.w,
            out_h: self.output.h,
            out_w: self.output.w,
            pad_h: self.conv.pad_h,
            pad_w: self.conv.pad_w,
            stride_h: self.conv.stride_h,
            stride_w: self.conv.stride_w,
        }
    }
}

fn four_dims(dims: &[usize], what: &str) -> Result<[usize; 4]> {
    <[usize; 4]>::try_from(dims).map_err(|_| {
        BackendError::BadParam(format!("{what} must be 4-D, got {} dims", dims.len()))
    })
}
