//! CPU backend implementation wrapping the convdnn-ops reference kernels.

use convdnn_ops::conv::{
    add_bias, conv2d_direct, conv2d_gemm, conv2d_precomputed, gemm_scratch_len, offset_table_fits,
    offset_table_len,
};
use convdnn_ops::element::Element;
use convdnn_ops::geometry::ConvGeometry;
use convdnn_ops::grad::{
    backward_bias, backward_data_direct, backward_data_gemm, backward_data_gemm_scratch_len,
    backward_filter_direct, backward_filter_gemm, backward_filter_gemm_scratch_len,
};

use crate::algo::{BwdDataAlgo, BwdFilterAlgo, FwdAlgo};
use crate::backend::{Backend, BackendError, DeviceCaps, Result, Workspace};
use crate::descriptor::{ConvProblem, TensorDescriptor};

const F32_BYTES: usize = core::mem::size_of::<f32>();

/// Forward algorithms in the order the heuristic prefers them.
const FWD_PREFERENCE: [FwdAlgo; 3] = [
    FwdAlgo::Gemm,
    FwdAlgo::ImplicitPrecompGemm,
    FwdAlgo::ImplicitGemm,
];
const BWD_FILTER_PREFERENCE: [BwdFilterAlgo; 2] = [BwdFilterAlgo::Algo1, BwdFilterAlgo::Algo0];
const BWD_DATA_PREFERENCE: [BwdDataAlgo; 2] = [BwdDataAlgo::Algo1, BwdDataAlgo::Algo0];

// ── Workspace ───────────────────────────────────────────────────────

/// CPU scratch memory backed by a `Vec<f32>`.
///
/// Reports exactly the byte count it was allocated with; the backing vector
/// is rounded up to whole `f32` words.
pub struct CpuWorkspace {
    data: Vec<f32>,
    bytes: usize,
}

impl CpuWorkspace {
    fn f32s(&mut self, len: usize) -> Result<&mut [f32]> {
        self.data
            .get_mut(..len)
            .ok_or_else(|| too_small(len * F32_BYTES, self.bytes))
    }

    fn u32s(&mut self, len: usize) -> Result<&mut [u32]> {
        Ok(bytemuck::cast_slice_mut(self.f32s(len)?))
    }
}

impl Workspace for CpuWorkspace {
    fn size_bytes(&self) -> usize {
        self.bytes
    }
}

fn too_small(needed: usize, have: usize) -> BackendError {
    BackendError::KernelError(format!(
        "workspace too small: algorithm needs {needed} bytes, {have} provided"
    ))
}

// ── Backend ─────────────────────────────────────────────────────────

/// CPU backend that delegates to the rayon-parallel kernels in convdnn-ops.
///
/// Implements the implicit-GEMM, precomputed-index and im2col+GEMM forward
/// algorithms and the first two algorithms of each backward pass. Everything
/// else reports `Unsupported`.
pub struct CpuBackend {
    caps: DeviceCaps,
    memory_limit: Option<usize>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            caps: DeviceCaps {
                name: "CPU".to_string(),
                total_memory: usize::MAX,
                free_memory: usize::MAX,
                has_fp16: true,
            },
            memory_limit: None,
        }
    }

    /// A backend whose workspace allocations fail above `bytes`.
    pub fn with_memory_limit(bytes: usize) -> Self {
        let mut backend = Self::new();
        backend.caps.total_memory = bytes;
        backend.caps.free_memory = bytes;
        backend.memory_limit = Some(bytes);
        backend
    }

    fn check_tensor<T: Element>(what: &str, desc: &TensorDescriptor, data: &[T]) -> Result<()> {
        if desc.dtype != T::DATA_TYPE {
            return Err(BackendError::KernelError(format!(
                "{what} descriptor is {} but data is {}",
                desc.dtype,
                T::DATA_TYPE
            )));
        }
        if data.len() != desc.len() {
            return Err(BackendError::KernelError(format!(
                "{what} has {} elements, descriptor expects {}",
                data.len(),
                desc.len()
            )));
        }
        Ok(())
    }

    fn check_problem<T: Element>(problem: &ConvProblem) -> Result<()> {
        if problem.dtype() != T::DATA_TYPE || problem.output.dtype != T::DATA_TYPE {
            return Err(BackendError::KernelError(format!(
                "problem is {} but kernel instantiated for {}",
                problem.dtype(),
                T::DATA_TYPE
            )));
        }
        Ok(())
    }

    fn check_len<T>(what: &str, data: &[T], expected: usize) -> Result<()> {
        if data.len() != expected {
            return Err(BackendError::KernelError(format!(
                "{what} has {} elements, expected {expected}",
                data.len()
            )));
        }
        Ok(())
    }

    fn bias_geometry<T: Element>(
        bias_desc: &TensorDescriptor,
        b: &[T],
        output_desc: &TensorDescriptor,
        y: &[T],
    ) -> Result<ConvGeometry> {
        Self::check_tensor("bias", bias_desc, b)?;
        Self::check_tensor("output", output_desc, y)?;
        if bias_desc.len() != output_desc.c {
            return Err(BackendError::KernelError(format!(
                "bias has {} channels, output has {}",
                bias_desc.len(),
                output_desc.c
            )));
        }
        Ok(ConvGeometry::for_output(
            output_desc.order,
            output_desc.n,
            output_desc.c,
            output_desc.h,
            output_desc.w,
        ))
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type Ws = CpuWorkspace;

    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn alloc_workspace(&self, bytes: usize) -> Result<CpuWorkspace> {
        if let Some(limit) = self.memory_limit {
            if bytes > limit {
                return Err(BackendError::OutOfMemory {
                    requested: bytes,
                    available: limit,
                });
            }
        }
        Ok(CpuWorkspace {
            data: vec![0.0; bytes.div_ceil(F32_BYTES)],
            bytes,
        })
    }

    fn forward_algorithm(&self, problem: &ConvProblem, limit_bytes: usize) -> Result<FwdAlgo> {
        for algo in FWD_PREFERENCE {
            match self.forward_workspace_size(problem, algo) {
                Ok(bytes) if bytes <= limit_bytes => return Ok(algo),
                Ok(_) | Err(BackendError::Unsupported(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Err(BackendError::Unsupported(format!(
            "no forward algorithm fits in {limit_bytes} bytes"
        )))
    }

    fn backward_filter_algorithm(
        &self,
        problem: &ConvProblem,
        limit_bytes: usize,
    ) -> Result<BwdFilterAlgo> {
        for algo in BWD_FILTER_PREFERENCE {
            if self.backward_filter_workspace_size(problem, algo)? <= limit_bytes {
                return Ok(algo);
            }
        }
        Err(BackendError::Unsupported(format!(
            "no filter-gradient algorithm fits in {limit_bytes} bytes"
        )))
    }

    fn backward_data_algorithm(
        &self,
        problem: &ConvProblem,
        limit_bytes: usize,
    ) -> Result<BwdDataAlgo> {
        for algo in BWD_DATA_PREFERENCE {
            if self.backward_data_workspace_size(problem, algo)? <= limit_bytes {
                return Ok(algo);
            }
        }
        Err(BackendError::Unsupported(format!(
            "no data-gradient algorithm fits in {limit_bytes} bytes"
        )))
    }

    fn forward_workspace_size(&self, problem: &ConvProblem, algo: FwdAlgo) -> Result<usize> {
        let g = problem.geometry();
        match algo {
            FwdAlgo::ImplicitGemm => Ok(0),
            FwdAlgo::ImplicitPrecompGemm if !offset_table_fits(&g) => Err(BackendError::Unsupported(
                format!("{algo} offsets overflow u32 for a {}x{} input plane", g.in_h, g.in_w),
            )),
            FwdAlgo::ImplicitPrecompGemm => Ok(offset_table_len(&g) * core::mem::size_of::<u32>()),
            FwdAlgo::Gemm => Ok(gemm_scratch_len(&g) * F32_BYTES),
            other => Err(BackendError::Unsupported(format!(
                "forward {other} is not implemented on CPU"
            ))),
        }
    }

    fn backward_filter_workspace_size(
        &self,
        problem: &ConvProblem,
        algo: BwdFilterAlgo,
    ) -> Result<usize> {
        let g = problem.geometry();
        match algo {
            BwdFilterAlgo::Algo0 => Ok(0),
            BwdFilterAlgo::Algo1 => Ok(backward_filter_gemm_scratch_len(&g) * F32_BYTES),
            other => Err(BackendError::Unsupported(format!(
                "{other} is not implemented on CPU"
            ))),
        }
    }

    fn backward_data_workspace_size(
        &self,
        problem: &ConvProblem,
        algo: BwdDataAlgo,
    ) -> Result<usize> {
        let g = problem.geometry();
        match algo {
            BwdDataAlgo::Algo0 => Ok(0),
            BwdDataAlgo::Algo1 => Ok(backward_data_gemm_scratch_len(&g) * F32_BYTES),
            other => Err(BackendError::Unsupported(format!(
                "{other} is not implemented on CPU"
            ))),
        }
    }

    fn convolution_forward<T: Element>(
        &self,
        problem: &ConvProblem,
        algo: FwdAlgo,
        x: &[T],
        w: &[T],
        workspace: &mut CpuWorkspace,
        y: &mut [T],
    ) -> Result<()> {
        Self::check_problem::<T>(problem)?;
        Self::check_tensor("input", &problem.input, x)?;
        Self::check_len("filter", w, problem.filter.len())?;
        Self::check_tensor("output", &problem.output, y)?;
        let needed = self.forward_workspace_size(problem, algo)?;
        if workspace.size_bytes() < needed {
            return Err(too_small(needed, workspace.size_bytes()));
        }
        let g = problem.geometry();
        match algo {
            FwdAlgo::ImplicitGemm => conv2d_direct(&g, x, w, y),
            FwdAlgo::ImplicitPrecompGemm => {
                let table = workspace.u32s(offset_table_len(&g))?;
                conv2d_precomputed(&g, x, w, table, y);
            }
            FwdAlgo::Gemm => {
                let scratch = workspace.f32s(gemm_scratch_len(&g))?;
                conv2d_gemm(&g, x, w, scratch, y);
            }
            other => {
                return Err(BackendError::Unsupported(format!(
                    "forward {other} is not implemented on CPU"
                )))
            }
        }
        Ok(())
    }

    fn add_bias<T: Element>(
        &self,
        bias_desc: &TensorDescriptor,
        b: &[T],
        output_desc: &TensorDescriptor,
        y: &mut [T],
    ) -> Result<()> {
        let g = Self::bias_geometry(bias_desc, b, output_desc, y)?;
        add_bias(&g, b, y);
        Ok(())
    }

    fn convolution_backward_bias<T: Element>(
        &self,
        output_desc: &TensorDescriptor,
        dy: &[T],
        bias_desc: &TensorDescriptor,
        db: &mut [T],
    ) -> Result<()> {
        let g = Self::bias_geometry(bias_desc, db, output_desc, dy)?;
        backward_bias(&g, dy, db);
        Ok(())
    }

    fn convolution_backward_filter<T: Element>(
        &self,
        problem: &ConvProblem,
        algo: BwdFilterAlgo,
        x: &[T],
        dy: &[T],
        workspace: &mut CpuWorkspace,
        dw: &mut [T],
    ) -> Result<()> {
        Self::check_problem::<T>(problem)?;
        Self::check_tensor("input", &problem.input, x)?;
        Self::check_tensor("output gradient", &problem.output, dy)?;
        Self::check_len("filter gradient", dw, problem.filter.len())?;
        let needed = self.backward_filter_workspace_size(problem, algo)?;
        if workspace.size_bytes() < needed {
            return Err(too_small(needed, workspace.size_bytes()));
        }
        let g = problem.geometry();
        match algo {
            BwdFilterAlgo::Algo0 => backward_filter_direct(&g, x, dy, dw),
            BwdFilterAlgo::Algo1 => {
                let scratch = workspace.f32s(backward_filter_gemm_scratch_len(&g))?;
                backward_filter_gemm(&g, x, dy, scratch, dw);
            }
            other => {
                return Err(BackendError::Unsupported(format!(
                    "{other} is not implemented on CPU"
                )))
            }
        }
        Ok(())
    }

    fn convolution_backward_data<T: Element>(
        &self,
        problem: &ConvProblem,
        algo: BwdDataAlgo,
        w: &[T],
        dy: &[T],
        workspace: &mut CpuWorkspace,
        dx: &mut [T],
    ) -> Result<()> {
        Self::check_problem::<T>(problem)?;
        Self::check_len("filter", w, problem.filter.len())?;
        Self::check_tensor("output gradient", &problem.output, dy)?;
        Self::check_tensor("input gradient", &problem.input, dx)?;
        let needed = self.backward_data_workspace_size(problem, algo)?;
        if workspace.size_bytes() < needed {
            return Err(too_small(needed, workspace.size_bytes()));
        }
        let g = problem.geometry();
        match algo {
            BwdDataAlgo::Algo0 => backward_data_direct(&g, w, dy, dx),
            BwdDataAlgo::Algo1 => {
                let scratch = workspace.f32s(backward_data_gemm_scratch_len(&g))?;
                backward_data_gemm(&g, w, dy, scratch, dx);
            }
            other => {
                return Err(BackendError::Unsupported(format!(
                    "{other} is not implemented on CPU"
                )))
            }
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}
