//! Forward convolution kernels (cross-correlation) and bias addition.
//!
//! All kernels overwrite `y`. Work is split per image so each output element
//! is produced by exactly one task with a fixed summation order.

use rayon::prelude::*;

use crate::element::Element;
use crate::geometry::ConvGeometry;
use crate::im2col::{im2col, unpack_output};
use crate::matmul::matmul;

/// Marker for a padded tap in the precomputed offset table.
pub const PADDED_TAP: u32 = u32::MAX;

fn check_forward<T>(g: &ConvGeometry, x: &[T], w: &[T], y: &[T]) {
    assert_eq!(x.len(), g.input_len(), "input length mismatch");
    assert_eq!(w.len(), g.filter_len(), "filter length mismatch");
    assert_eq!(y.len(), g.output_len(), "output length mismatch");
}

/// Direct loop nest with no scratch memory.
pub fn conv2d_direct<T: Element>(g: &ConvGeometry, x: &[T], w: &[T], y: &mut [T]) {
    check_forward(g, x, w, y);
    if g.output_len() == 0 {
        return;
    }
    y.par_chunks_mut(g.output_image_len())
        .enumerate()
        .for_each(|(n, y_n)| {
            for m in 0..g.out_channels {
                for oh in 0..g.out_h {
                    for ow in 0..g.out_w {
                        let mut acc = 0.0f32;
                        for c in 0..g.in_channels {
                            for i in 0..g.kernel_h {
                                let Some(ih) = g.input_row(oh, i) else {
                                    continue;
                                };
                                for j in 0..g.kernel_w {
                                    let Some(iw) = g.input_col(ow, j) else {
                                        continue;
                                    };
                                    acc += x[g.input_index(n, c, ih, iw)].to_f32()
                                        * w[g.filter_index(m, c, i, j)].to_f32();
                                }
                            }
                        }
                        y_n[g.output_index(0, m, oh, ow)] = T::from_f32(acc);
                    }
                }
            }
        });
}

/// Entries needed by [`conv2d_precomputed`]: one per (output position, tap).
pub fn offset_table_len(g: &ConvGeometry) -> usize {
    g.out_plane() * g.kernel_h * g.kernel_w
}

/// Whether every input spatial offset fits a table entry without colliding
/// with [`PADDED_TAP`].
pub fn offset_table_fits(g: &ConvGeometry) -> bool {
    g.in_plane() < PADDED_TAP as usize
}

/// Fill `table` with flattened input spatial offsets per (output position, tap).
pub fn build_offset_table(g: &ConvGeometry, table: &mut [u32]) {
    assert_eq!(table.len(), offset_table_len(g));
    let taps = g.kernel_h * g.kernel_w;
    for oh in 0..g.out_h {
        for ow in 0..g.out_w {
            let base = (oh * g.out_w + ow) * taps;
            for i in 0..g.kernel_h {
                for j in 0..g.kernel_w {
                    table[base + i * g.kernel_w + j] = match (g.input_row(oh, i), g.input_col(ow, j)) {
                        (Some(ih), Some(iw)) => (ih * g.in_w + iw) as u32,
                        _ => PADDED_TAP,
                    };
                }
            }
        }
    }
}

/// Direct convolution driven by a precomputed tap offset table.
///
/// `table` is scratch of [`offset_table_len`] entries; it is rebuilt on every
/// call.
pub fn conv2d_precomputed<T: Element>(
    g: &ConvGeometry,
    x: &[T],
    w: &[T],
    table: &mut [u32],
    y: &mut [T],
) {
    check_forward(g, x, w, y);
    if g.output_len() == 0 {
        return;
    }
    build_offset_table(g, table);
    let table: &[u32] = table;
    let taps = g.kernel_h * g.kernel_w;
    y.par_chunks_mut(g.output_image_len())
        .enumerate()
        .for_each(|(n, y_n)| {
            for m in 0..g.out_channels {
                for p in 0..g.out_plane() {
                    let offsets = &table[p * taps..(p + 1) * taps];
                    let mut acc = 0.0f32;
                    for c in 0..g.in_channels {
                        for (tap, &s) in offsets.iter().enumerate() {
                            if s == PADDED_TAP {
                                continue;
                            }
                            let (i, j) = (tap / g.kernel_w, tap % g.kernel_w);
                            acc += x[g.input_spatial_index(n, c, s as usize)].to_f32()
                                * w[g.filter_index(m, c, i, j)].to_f32();
                        }
                    }
                    y_n[g.output_index(0, m, p / g.out_w, p % g.out_w)] = T::from_f32(acc);
                }
            }
        });
}

/// Scratch `f32` elements needed by [`conv2d_gemm`].
pub fn gemm_scratch_len(g: &ConvGeometry) -> usize {
    (g.patch_len() + g.out_channels) * g.out_plane()
}

/// im2col followed by a filter × column GEMM per image.
pub fn conv2d_gemm<T: Element>(
    g: &ConvGeometry,
    x: &[T],
    w: &[T],
    scratch: &mut [f32],
    y: &mut [T],
) {
    check_forward(g, x, w, y);
    assert!(scratch.len() >= gemm_scratch_len(g), "gemm scratch too small");
    let plane = g.out_plane();
    let (col, rest) = scratch.split_at_mut(g.patch_len() * plane);
    let out = &mut rest[..g.out_channels * plane];
    for n in 0..g.batch {
        im2col(g, x, n, col);
        matmul(w, col, out, g.out_channels, plane, g.patch_len());
        unpack_output(g, out, n, y);
    }
}

/// `y += bias` broadcast over batch and spatial positions.
pub fn add_bias<T: Element>(g: &ConvGeometry, bias: &[T], y: &mut [T]) {
    assert_eq!(bias.len(), g.out_channels, "bias length mismatch");
    assert_eq!(y.len(), g.output_len(), "output length mismatch");
    if g.output_len() == 0 {
        return;
    }
    y.par_chunks_mut(g.output_image_len())
        .for_each(|y_n| {
            for m in 0..g.out_channels {
                let b = bias[m].to_f32();
                for oh in 0..g.out_h {
                    for ow in 0..g.out_w {
                        let v = &mut y_n[g.output_index(0, m, oh, ow)];
                        *v = T::from_f32(v.to_f32() + b);
                    }
                }
            }
        });
}
