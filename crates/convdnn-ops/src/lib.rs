//! Reference 2-D convolution kernels.
//!
//! Every kernel here is written against a [`geometry::ConvGeometry`] so the
//! same loop nest serves channel-first and channel-last layouts. Kernels
//! accumulate in `f32` regardless of the storage element type.

pub mod conv;
pub mod element;
pub mod geometry;
pub mod grad;
pub mod im2col;
pub mod matmul;
