//! Backend trait and core types for device-agnostic convolution.

use convdnn_ops::element::Element;

use crate::algo::{BwdDataAlgo, BwdFilterAlgo, FwdAlgo};
use crate::descriptor::{ConvProblem, TensorDescriptor};

/// Errors that can occur during backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    #[error("kernel error: {0}")]
    KernelError(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("bad parameter: {0}")]
    BadParam(String),

    #[error("device error: {0}")]
    DeviceError(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Device capability information, queried at backend construction time.
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    pub name: String,
    /// Total device memory in bytes.
    pub total_memory: usize,
    /// Free device memory in bytes (snapshot at query time).
    pub free_memory: usize,
    pub has_fp16: bool,
}

/// Scratch memory an algorithm may use during one compute call.
///
/// Contents carry no meaning between calls.
pub trait Workspace: Send + Sized {
    /// Usable size in bytes.
    fn size_bytes(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size_bytes() == 0
    }
}

/// A compute backend for 2-D convolution.
///
/// The trait uses associated types and generic methods rather than trait
/// objects so that each backend and precision pair is monomorphized at
/// compile time.
///
/// # Execution model
///
/// Operations may execute asynchronously relative to the host. Call
/// `synchronize()` to wait for all enqueued operations to complete; the
/// algorithm benchmark relies on this for timing.
pub trait Backend: Send + Sync + Sized {
    /// Scratch buffer type for this backend.
    type Ws: Workspace;

    /// Query device capabilities.
    fn caps(&self) -> &DeviceCaps;

    /// Allocate a workspace of exactly `bytes` usable bytes.
    fn alloc_workspace(&self, bytes: usize) -> Result<Self::Ws>;

    // ── Algorithm queries ───────────────────────────────────────────

    /// Fastest forward algorithm predicted to need at most `limit_bytes`.
    fn forward_algorithm(&self, problem: &ConvProblem, limit_bytes: usize) -> Result<FwdAlgo>;

    /// Fastest filter-gradient algorithm predicted to need at most `limit_bytes`.
    fn backward_filter_algorithm(
        &self,
        problem: &ConvProblem,
        limit_bytes: usize,
    ) -> Result<BwdFilterAlgo>;

    /// Fastest data-gradient algorithm predicted to need at most `limit_bytes`.
    fn backward_data_algorithm(
        &self,
        problem: &ConvProblem,
        limit_bytes: usize,
    ) -> Result<BwdDataAlgo>;

    /// Scratch bytes `algo` needs for `problem`.
    ///
    /// Returns `Unsupported` when the backend does not implement `algo`.
    fn forward_workspace_size(&self, problem: &ConvProblem, algo: FwdAlgo) -> Result<usize>;

    fn backward_filter_workspace_size(
        &self,
        problem: &ConvProblem,
        algo: BwdFilterAlgo,
    ) -> Result<usize>;

    fn backward_data_workspace_size(
        &self,
        problem: &ConvProblem,
        algo: BwdDataAlgo,
    ) -> Result<usize>;

    // ── Compute operations ──────────────────────────────────────────

    /// `y = conv(x, w)`. `y` is overwritten.
    fn convolution_forward<T: Element>(
        &self,
        problem: &ConvProblem,
        algo: FwdAlgo,
        x: &[T],
        w: &[T],
        workspace: &mut Self::Ws,
        y: &mut [T],
    ) -> Result<()>;

    /// `y += b`, with `b` broadcast over batch and spatial positions.
    fn add_bias<T: Element>(
        &self,
        bias_desc: &TensorDescriptor,
        b: &[T],
        output_desc: &TensorDescriptor,
        y: &mut [T],
    ) -> Result<()>;

    /// `db = Σ dy` over batch and spatial positions. `db` is overwritten.
    fn convolution_backward_bias<T: Element>(
        &self,
        output_desc: &TensorDescriptor,
        dy: &[T],
        bias_desc: &TensorDescriptor,
        db: &mut [T],
    ) -> Result<()>;

    /// Filter gradient. `dw` is overwritten.
    fn convolution_backward_filter<T: Element>(
        &self,
        problem: &ConvProblem,
        algo: BwdFilterAlgo,
        x: &[T],
        dy: &[T],
        workspace: &mut Self::Ws,
        dw: &mut [T],
    ) -> Result<()>;

    /// Input gradient. `dx` is overwritten.
    fn convolution_backward_data<T: Element>(
        &self,
        problem: &ConvProblem,
        algo: BwdDataAlgo,
        w: &[T],
        dy: &[T],
        workspace: &mut Self::Ws,
        dx: &mut [T],
    ) -> Result<()>;

    /// Block until every enqueued operation has completed.
    fn synchronize(&self) -> Result<()>;
}
