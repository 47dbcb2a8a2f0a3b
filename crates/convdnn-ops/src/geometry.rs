//! Layout-aware convolution geometry.

use convdnn_util::basics::StorageOrder;

/// Output extent along one spatial axis:
/// `(input + pad_begin + pad_end - kernel) / stride + 1`.
///
/// Returns `None` when the padded input is smaller than the kernel, the
/// stride is zero, or the padded extent overflows.
pub fn output_extent(
    input: usize,
    kernel: usize,
    stride: usize,
    pad_begin: usize,
    pad_end: usize,
) -> Option<usize> {
    if stride == 0 || kernel == 0 {
        return None;
    }
    let padded = input.checked_add(pad_begin)?.checked_add(pad_end)?;
    if padded < kernel {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

/// Fully resolved shape of one 2-D convolution problem.
///
/// Padding is symmetric: `pad_h` rows are added above and below, `pad_w`
/// columns left and right.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConvGeometry {
    pub order: StorageOrder,
    pub batch: usize,
    pub in_channels: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub out_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl ConvGeometry {
    /// Geometry describing only an output tensor, for bias kernels that never
    /// touch the input or filter.
    pub fn for_output(order: StorageOrder, batch: usize, channels: usize, h: usize, w: usize) -> Self {
        Self {
            order,
            batch,
            in_channels: 0,
            in_h: 0,
            in_w: 0,
            out_channels: channels,
            kernel_h: 1,
            kernel_w: 1,
            out_h: h,
            out_w: w,
            pad_h: 0,
            pad_w: 0,
            stride_h: 1,
            stride_w: 1,
        }
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.in_channels * self.in_h * self.in_w
    }

    pub fn filter_len(&self) -> usize {
        self.out_channels * self.patch_len()
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.out_channels * self.out_plane()
    }

    /// Elements in one receptive field: `C * kh * kw`.
    pub fn patch_len(&self) -> usize {
        self.in_channels * self.kernel_h * self.kernel_w
    }

    pub fn in_plane(&self) -> usize {
        self.in_h * self.in_w
    }

    pub fn out_plane(&self) -> usize {
        self.out_h * self.out_w
    }

    /// Elements of one image of the input.
    pub fn input_image_len(&self) -> usize {
        self.in_channels * self.in_plane()
    }

    /// Elements of one image of the output.
    pub fn output_image_len(&self) -> usize {
        self.out_channels * self.out_plane()
    }

    #[inline]
    pub fn input_index(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        self.input_spatial_index(n, c, h * self.in_w + w)
    }

    /// Input offset from a flattened spatial position `s = h * W + w`.
    #[inline]
    pub fn input_spatial_index(&self, n: usize, c: usize, s: usize) -> usize {
        match self.order {
            StorageOrder::Nchw => (n * self.in_channels + c) * self.in_plane() + s,
            StorageOrder::Nhwc => (n * self.in_plane() + s) * self.in_channels + c,
        }
    }

    #[inline]
    pub fn output_index(&self, n: usize, m: usize, h: usize, w: usize) -> usize {
        let s = h * self.out_w + w;
        match self.order {
            StorageOrder::Nchw => (n * self.out_channels + m) * self.out_plane() + s,
            StorageOrder::Nhwc => (n * self.out_plane() + s) * self.out_channels + m,
        }
    }

    /// Offset of `(c, i, j)` inside one output channel's filter block.
    #[inline]
    pub fn filter_inner_index(&self, c: usize, i: usize, j: usize) -> usize {
        match self.order {
            StorageOrder::Nchw => (c * self.kernel_h + i) * self.kernel_w + j,
            StorageOrder::Nhwc => (i * self.kernel_w + j) * self.in_channels + c,
        }
    }

    #[inline]
    pub fn filter_index(&self, m: usize, c: usize, i: usize, j: usize) -> usize {
        m * self.patch_len() + self.filter_inner_index(c, i, j)
    }

    /// Input row touched by output row `oh` and kernel row `i`, if not padding.
    #[inline]
    pub fn input_row(&self, oh: usize, i: usize) -> Option<usize> {
        input_coord(oh, i, self.stride_h, self.pad_h, self.in_h)
    }

    /// Input column touched by output column `ow` and kernel column `j`.
    #[inline]
    pub fn input_col(&self, ow: usize, j: usize) -> Option<usize> {
        input_coord(ow, j, self.stride_w, self.pad_w, self.in_w)
    }

    /// Output row reading input row `ih` through kernel row `i`, if any.
    #[inline]
    pub fn output_row(&self, ih: usize, i: usize) -> Option<usize> {
        output_coord(ih, i, self.stride_h, self.pad_h, self.out_h)
    }

    #[inline]
    pub fn output_col(&self, iw: usize, j: usize) -> Option<usize> {
        output_coord(iw, j, self.stride_w, self.pad_w, self.out_w)
    }
}

#[inline]
fn input_coord(o: usize, k: usize, stride: usize, pad: usize, extent: usize) -> Option<usize> {
    let v = o * stride + k;
    if v < pad || v - pad >= extent {
        None
    } else {
        Some(v - pad)
    }
}

#[inline]
fn output_coord(i: usize, k: usize, stride: usize, pad: usize, extent: usize) -> Option<usize> {
    let v = i + pad;
    if v < k || (v - k) % stride != 0 {
        return None;
    }
    let o = (v - k) / stride;
    (o < extent).then_some(o)
}
