//! Backward convolution kernels: bias, filter and data gradients.

use rayon::prelude::*;

use crate::element::Element;
use crate::geometry::ConvGeometry;
use crate::im2col::{col2im, im2col, pack_output};
use crate::matmul::{matmul_a_bt_acc, matmul_at_b};

/// `db[m] = Σ dy[n, m, h, w]` over batch and spatial positions.
pub fn backward_bias<T: Element>(g: &ConvGeometry, dy: &[T], db: &mut [T]) {
    assert_eq!(dy.len(), g.output_len(), "output gradient length mismatch");
    assert_eq!(db.len(), g.out_channels, "bias gradient length mismatch");
    db.par_iter_mut().enumerate().for_each(|(m, db_m)| {
        let mut acc = 0.0f32;
        for n in 0..g.batch {
            for oh in 0..g.out_h {
                for ow in 0..g.out_w {
                    acc += dy[g.output_index(n, m, oh, ow)].to_f32();
                }
            }
        }
        *db_m = T::from_f32(acc);
    });
}

/// Filter gradient by direct summation, no scratch.
pub fn backward_filter_direct<T: Element>(g: &ConvGeometry, x: &[T], dy: &[T], dw: &mut [T]) {
    assert_eq!(x.len(), g.input_len(), "input length mismatch");
    assert_eq!(dy.len(), g.output_len(), "output gradient length mismatch");
    assert_eq!(dw.len(), g.filter_len(), "filter gradient length mismatch");
    if dw.is_empty() {
        return;
    }
    dw.par_chunks_mut(g.patch_len())
        .enumerate()
        .for_each(|(m, dw_m)| {
            for c in 0..g.in_channels {
                for i in 0..g.kernel_h {
                    for j in 0..g.kernel_w {
                        let mut acc = 0.0f32;
                        for n in 0..g.batch {
                            for oh in 0..g.out_h {
                                let Some(ih) = g.input_row(oh, i) else {
                                    continue;
                                };
                                for ow in 0..g.out_w {
                                    let Some(iw) = g.input_col(ow, j) else {
                                        continue;
                                    };
                                    acc += x[g.input_index(n, c, ih, iw)].to_f32()
                                        * dy[g.output_index(n, m, oh, ow)].to_f32();
                                }
                            }
                        }
                        dw_m[g.filter_inner_index(c, i, j)] = T::from_f32(acc);
                    }
                }
            }
        });
}

/// Scratch `f32` elements needed by [`backward_filter_gemm`].
pub fn backward_filter_gemm_scratch_len(g: &ConvGeometry) -> usize {
    (g.patch_len() + g.out_channels) * g.out_plane() + g.filter_len()
}

/// Filter gradient as `Σₙ dyₙ · colₙᵀ`, accumulated in `f32` scratch.
pub fn backward_filter_gemm<T: Element>(
    g: &ConvGeometry,
    x: &[T],
    dy: &[T],
    scratch: &mut [f32],
    dw: &mut [T],
) {
    assert_eq!(x.len(), g.input_len(), "input length mismatch");
    assert_eq!(dy.len(), g.output_len(), "output gradient length mismatch");
    assert_eq!(dw.len(), g.filter_len(), "filter gradient length mismatch");
    assert!(
        scratch.len() >= backward_filter_gemm_scratch_len(g),
        "backward filter scratch too small"
    );
    let plane = g.out_plane();
    let (col, rest) = scratch.split_at_mut(g.patch_len() * plane);
    let (dy_n, rest) = rest.split_at_mut(g.out_channels * plane);
    let acc = &mut rest[..g.filter_len()];
    acc.fill(0.0);
    for n in 0..g.batch {
        im2col(g, x, n, col);
        pack_output(g, dy, n, dy_n);
        matmul_a_bt_acc(dy_n, col, acc, g.out_channels, plane, g.patch_len());
    }
    for (dst, &src) in dw.iter_mut().zip(acc.iter()) {
        *dst = T::from_f32(src);
    }
}

/// Input gradient by gathering every output position each input feeds.
pub fn backward_data_direct<T: Element>(g: &ConvGeometry, w: &[T], dy: &[T], dx: &mut [T]) {
    assert_eq!(w.len(), g.filter_len(), "filter length mismatch");
    assert_eq!(dy.len(), g.output_len(), "output gradient length mismatch");
    assert_eq!(dx.len(), g.input_len(), "input gradient length mismatch");
    if dx.is_empty() {
        return;
    }
    dx.par_chunks_mut(g.input_image_len())
        .enumerate()
        .for_each(|(n, dx_n)| {
            for c in 0..g.in_channels {
                for ih in 0..g.in_h {
                    for iw in 0..g.in_w {
                        let mut acc = 0.0f32;
                        for m in 0..g.out_channels {
                            for i in 0..g.kernel_h {
                                let Some(oh) = g.output_row(ih, i) else {
                                    continue;
                                };
                                for j in 0..g.kernel_w {
                                    let Some(ow) = g.output_col(iw, j) else {
                                        continue;
                                    };
                                    acc += w[g.filter_index(m, c, i, j)].to_f32()
                                        * dy[g.output_index(n, m, oh, ow)].to_f32();
                                }
                            }
                        }
                        dx_n[g.input_index(0, c, ih, iw)] = T::from_f32(acc);
                    }
                }
            }
        });
}

/// Scratch `f32` elements needed by [`backward_data_gemm`].
pub fn backward_data_gemm_scratch_len(g: &ConvGeometry) -> usize {
    (g.patch_len() + g.out_channels) * g.out_plane() + g.input_image_len()
}

/// Input gradient as `col2im(wᵀ · dyₙ)` per image.
pub fn backward_data_gemm<T: Element>(
    g: &ConvGeometry,
    w: &[T],
    dy: &[T],
    scratch: &mut [f32],
    dx: &mut [T],
) {
    assert_eq!(w.len(), g.filter_len(), "filter length mismatch");
    assert_eq!(dy.len(), g.output_len(), "output gradient length mismatch");
    assert_eq!(dx.len(), g.input_len(), "input gradient length mismatch");
    assert!(
        scratch.len() >= backward_data_gemm_scratch_len(g),
        "backward data scratch too small"
    );
    let plane = g.out_plane();
    let image_len = g.input_image_len();
    let (col, rest) = scratch.split_at_mut(g.patch_len() * plane);
    let (dy_n, rest) = rest.split_at_mut(g.out_channels * plane);
    let image = &mut rest[..image_len];
    for n in 0..g.batch {
        pack_output(g, dy, n, dy_n);
        matmul_at_b(w, dy_n, col, g.out_channels, plane, g.patch_len());
        image.fill(0.0);
        col2im(g, col, image);
        for (dst, &src) in dx[n * image_len..(n + 1) * image_len].iter_mut().zip(image.iter()) {
            *dst = T::from_f32(src);
        }
    }
}
