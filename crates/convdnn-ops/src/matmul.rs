//! Scalar matmul kernels used by the GEMM-based convolution algorithms.
//!
//! The left operand is always a filter in its storage type; the right operand
//! and the result are `f32` scratch. Rows of the result are computed in
//! parallel, each row by a single task, so results do not depend on the
//! thread count.

use rayon::prelude::*;

use crate::element::Element;

const PAR_THRESHOLD: usize = 32 * 32 * 32;

/// `c[m×n] = a[m×k] * b[k×n]`.
pub fn matmul<T: Element>(a: &[T], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    assert_eq!(a.len(), m * k);
    assert_eq!(b.len(), k * n);
    assert_eq!(c.len(), m * n);
    let row = |(i, c_row): (usize, &mut [f32])| {
        c_row.fill(0.0);
        let a_row = &a[i * k..(i + 1) * k];
        for (p, a_ip) in a_row.iter().enumerate() {
            let a_ip = a_ip.to_f32();
            let b_row = &b[p * n..(p + 1) * n];
            for (c_j, b_j) in c_row.iter_mut().zip(b_row) {
                *c_j += a_ip * b_j;
            }
        }
    };
    if m * n * k >= PAR_THRESHOLD {
        c.par_chunks_mut(n.max(1)).enumerate().for_each(row);
    } else {
        c.chunks_mut(n.max(1)).enumerate().for_each(row);
    }
}

/// `c[k×n] = a[m×k]ᵀ * b[m×n]`.
pub fn matmul_at_b<T: Element>(a: &[T], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    assert_eq!(a.len(), m * k);
    assert_eq!(b.len(), m * n);
    assert_eq!(c.len(), k * n);
    let row = |(p, c_row): (usize, &mut [f32])| {
        c_row.fill(0.0);
        for i in 0..m {
            let a_ip = a[i * k + p].to_f32();
            if a_ip == 0.0 {
                continue;
            }
            let b_row = &b[i * n..(i + 1) * n];
            for (c_j, b_j) in c_row.iter_mut().zip(b_row) {
                *c_j += a_ip * b_j;
            }
        }
    };
    if m * n * k >= PAR_THRESHOLD {
        c.par_chunks_mut(n.max(1)).enumerate().for_each(row);
    } else {
        c.chunks_mut(n.max(1)).enumerate().for_each(row);
    }
}

/// `c[m×k] += a[m×n] * b[k×n]ᵀ`, all operands `f32`.
pub fn matmul_a_bt_acc(a: &[f32], b: &[f32], c: &mut [f32], m: usize, n: usize, k: usize) {
    assert_eq!(a.len(), m * n);
    assert_eq!(b.len(), k * n);
    assert_eq!(c.len(), m * k);
    let row = |(i, c_row): (usize, &mut [f32])| {
        let a_row = &a[i * n..(i + 1) * n];
        for (p, c_ip) in c_row.iter_mut().enumerate() {
            let b_row = &b[p * n..(p + 1) * n];
            let mut sum = 0.0f32;
            for (x, y) in a_row.iter().zip(b_row) {
                sum += x * y;
            }
            *c_ip += sum;
        }
    };
    if m * n * k >= PAR_THRESHOLD {
        c.par_chunks_mut(k.max(1)).enumerate().for_each(row);
    } else {
        c.chunks_mut(k.max(1)).enumerate().for_each(row);
    }
}
