//! Compute backend abstraction for convolution dispatch.
//!
//! The dispatcher in `convdnn-core` never computes a convolution itself. It
//! describes a problem with the descriptors in [`descriptor`], asks a
//! [`backend::Backend`] which of the algorithms in [`algo`] to use and how
//! much scratch memory that algorithm needs, and then calls the backend's
//! compute entry points.

/// Algorithm identifiers and benchmark records.
pub mod algo;

/// Backend trait, capability and error definitions.
pub mod backend;

/// CPU reference backend.
pub mod cpu;

/// Tensor, filter and convolution descriptors.
pub mod descriptor;

pub use convdnn_ops::element::{DataType, Element};
