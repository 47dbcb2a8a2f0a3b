//! Patch unfolding between image layout and column matrices.
//!
//! A column matrix for image `n` has `patch_len()` rows and `out_plane()`
//! columns. Row `r` corresponds to the filter inner offset
//! `filter_inner_index(c, i, j)`, so a filter block multiplies it directly.

use crate::element::Element;
use crate::geometry::ConvGeometry;

/// Unfold image `n` of `x` into `col` (`patch_len × out_plane`).
pub fn im2col<T: Element>(g: &ConvGeometry, x: &[T], n: usize, col: &mut [f32]) {
    let plane = g.out_plane();
    assert_eq!(col.len(), g.patch_len() * plane);
    for c in 0..g.in_channels {
        for i in 0..g.kernel_h {
            for j in 0..g.kernel_w {
                let r = g.filter_inner_index(c, i, j);
                let row = &mut col[r * plane..(r + 1) * plane];
                for oh in 0..g.out_h {
                    let ih = g.input_row(oh, i);
                    for ow in 0..g.out_w {
                        row[oh * g.out_w + ow] = match (ih, g.input_col(ow, j)) {
                            (Some(ih), Some(iw)) => x[g.input_index(n, c, ih, iw)].to_f32(),
                            _ => 0.0,
                        };
                    }
                }
            }
        }
    }
}

/// Fold `col` back into one image, accumulating overlapping patches.
///
/// `image` holds one image in the input layout (`input_image_len()` values)
/// and is accumulated into, not overwritten.
pub fn col2im(g: &ConvGeometry, col: &[f32], image: &mut [f32]) {
    let plane = g.out_plane();
    assert_eq!(col.len(), g.patch_len() * plane);
    assert_eq!(image.len(), g.input_image_len());
    for c in 0..g.in_channels {
        for i in 0..g.kernel_h {
            for j in 0..g.kernel_w {
                let r = g.filter_inner_index(c, i, j);
                let row = &col[r * plane..(r + 1) * plane];
                for oh in 0..g.out_h {
                    let Some(ih) = g.input_row(oh, i) else {
                        continue;
                    };
                    for ow in 0..g.out_w {
                        if let Some(iw) = g.input_col(ow, j) {
                            image[g.input_index(0, c, ih, iw)] += row[oh * g.out_w + ow];
                        }
                    }
                }
            }
        }
    }
}

/// Gather image `n` of an output-shaped tensor into `dst` (`out_channels × out_plane`).
pub fn pack_output<T: Element>(g: &ConvGeometry, y: &[T], n: usize, dst: &mut [f32]) {
    let plane = g.out_plane();
    assert_eq!(dst.len(), g.out_channels * plane);
    for m in 0..g.out_channels {
        for oh in 0..g.out_h {
            for ow in 0..g.out_w {
                dst[m * plane + oh * g.out_w + ow] = y[g.output_index(n, m, oh, ow)].to_f32();
            }
        }
    }
}

/// Scatter `src` (`out_channels × out_plane`) into image `n` of `y`.
pub fn unpack_output<T: Element>(g: &ConvGeometry, src: &[f32], n: usize, y: &mut [T]) {
    let plane = g.out_plane();
    assert_eq!(src.len(), g.out_channels * plane);
    for m in 0..g.out_channels {
        for oh in 0..g.out_h {
            for ow in 0..g.out_w {
                y[g.output_index(n, m, oh, ow)] = T::from_f32(src[m * plane + oh * g.out_w + ow]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convdnn_util::basics::StorageOrder;

    #[test]
    fn col2im_of_ones_counts_patch_coverage() {
        let g = ConvGeometry {
            order: StorageOrder::Nchw,
            batch: 1,
            in_channels: 1,
            in_h: 3,
            in_w: 3,
            out_channels: 1,
            kernel_h: 2,
            kernel_w: 2,
            out_h: 2,
            out_w: 2,
            pad_h: 0,
            pad_w: 0,
            stride_h: 1,
            stride_w: 1,
        };
        let col = vec![1.0f32; g.patch_len() * g.out_plane()];
        let mut image = vec![0.0f32; g.input_image_len()];
        col2im(&g, &col, &mut image);
        assert_eq!(image, vec![1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn im2col_zero_fills_padding() {
        let g = ConvGeometry {
            order: StorageOrder::Nhwc,
            batch: 1,
            in_channels: 1,
            in_h: 2,
            in_w: 2,
            out_channels: 1,
            kernel_h: 3,
            kernel_w: 3,
            out_h: 2,
            out_w: 2,
            pad_h: 1,
            pad_w: 1,
            stride_h: 1,
            stride_w: 1,
        };
        let x = [1.0f32, 2.0, 3.0, 4.0];
        let mut col = vec![-1.0f32; g.patch_len() * g.out_plane()];
        im2col(&g, &x, 0, &mut col);
        // Kernel centre sees every pixel exactly once.
        let centre = g.filter_inner_index(0, 1, 1) * g.out_plane();
        assert_eq!(&col[centre..centre + 4], &[1.0, 2.0, 3.0, 4.0]);
        // Top-left tap sees only the bottom-right output's top-left pixel.
        assert_eq!(&col[0..4], &[0.0, 0.0, 0.0, 1.0]);
    }
}
