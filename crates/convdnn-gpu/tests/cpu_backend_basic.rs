use convdnn_gpu::algo::{BwdDataAlgo, BwdFilterAlgo, FwdAlgo};
use convdnn_gpu::backend::{Backend, BackendError, Workspace};
use convdnn_gpu::cpu::CpuBackend;
use convdnn_gpu::descriptor::{
    ConvProblem, ConvolutionDescriptor, FilterDescriptor, TensorDescriptor,
};
use convdnn_gpu::DataType;
use convdnn_util::basics::StorageOrder;
use half::f16;

fn approx_eq(a: &[f32], b: &[f32], tol: f32) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (&x, &y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        assert!(
            diff <= tol,
            "mismatch at index {}: {} vs {} (diff={})",
            i,
            x,
            y,
            diff
        );
    }
}

fn fill_deterministic(buf: &mut [f32], mut state: u64) {
    for v in buf.iter_mut() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let x = ((state >> 33) as u32) as f32 / (u32::MAX as f32);
        *v = x * 2.0 - 1.0;
    }
}

fn problem(order: StorageOrder, dtype: DataType) -> ConvProblem {
    let (x_dims, w_dims) = match order {
        StorageOrder::Nchw => ([2, 3, 6, 5], [4, 3, 3, 3]),
        StorageOrder::Nhwc => ([2, 6, 5, 3], [4, 3, 3, 3]),
    };
    let x = TensorDescriptor::from_dims(order, dtype, &x_dims).unwrap();
    let w = FilterDescriptor::from_dims(order, dtype, &w_dims).unwrap();
    let conv = ConvolutionDescriptor::new(1, 1, 1, 1).unwrap();
    ConvProblem::new(x, w, conv).unwrap()
}

fn run_forward(
    backend: &CpuBackend,
    p: &ConvProblem,
    algo: FwdAlgo,
    x: &[f32],
    w: &[f32],
) -> Vec<f32> {
    let bytes = backend.forward_workspace_size(p, algo).unwrap();
    let mut ws = backend.alloc_workspace(bytes).unwrap();
    let mut y = vec![0.0f32; p.output.len()];
    backend
        .convolution_forward(p, algo, x, w, &mut ws, &mut y)
        .unwrap();
    y
}

#[test]
fn cpu_backend_caps() {
    let backend = CpuBackend::new();
    let caps = backend.caps();
    assert_eq!(caps.name, "CPU");
    assert!(caps.has_fp16);
    assert_eq!(CpuBackend::with_memory_limit(1024).caps().total_memory, 1024);
}

#[test]
fn workspace_reports_exact_bytes() {
    let backend = CpuBackend::new();
    let ws = backend.alloc_workspace(10).unwrap();
    assert_eq!(ws.size_bytes(), 10);
    assert!(backend.alloc_workspace(0).unwrap().is_empty());
}

#[test]
fn memory_limit_rejects_large_allocations() {
    let backend = CpuBackend::with_memory_limit(64);
    assert!(backend.alloc_workspace(64).is_ok());
    match backend.alloc_workspace(65) {
        Err(BackendError::OutOfMemory {
            requested,
            available,
        }) => {
            assert_eq!(requested, 65);
            assert_eq!(available, 64);
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("allocation above the limit succeeded"),
    }
}

#[test]
fn unsupported_algorithms_are_reported() {
    let backend = CpuBackend::new();
    let p = problem(StorageOrder::Nchw, DataType::F32);
    for algo in [FwdAlgo::Direct, FwdAlgo::Fft, FwdAlgo::FftTiling, FwdAlgo::Winograd] {
        assert!(matches!(
            backend.forward_workspace_size(&p, algo),
            Err(BackendError::Unsupported(_))
        ));
    }
    for algo in [BwdFilterAlgo::Fft, BwdFilterAlgo::Algo3] {
        assert!(matches!(
            backend.backward_filter_workspace_size(&p, algo),
            Err(BackendError::Unsupported(_))
        ));
    }
    for algo in [BwdDataAlgo::Fft, BwdDataAlgo::FftTiling, BwdDataAlgo::Winograd] {
        assert!(matches!(
            backend.backward_data_workspace_size(&p, algo),
            Err(BackendError::Unsupported(_))
        ));
    }
}

#[test]
fn offset_table_is_unsupported_for_huge_planes() {
    let backend = CpuBackend::new();
    let order = StorageOrder::Nchw;
    let x = TensorDescriptor::from_dims(order, DataType::F32, &[1, 1, 1 << 16, 1 << 16]).unwrap();
    let w = FilterDescriptor::from_dims(order, DataType::F32, &[1, 1, 1, 1]).unwrap();
    let conv = ConvolutionDescriptor::new(0, 0, 1, 1).unwrap();
    let p = ConvProblem::new(x, w, conv).unwrap();

    assert!(matches!(
        backend.forward_workspace_size(&p, FwdAlgo::ImplicitPrecompGemm),
        Err(BackendError::Unsupported(_))
    ));
    // The heuristic steps past it to the next candidate.
    assert_eq!(backend.forward_algorithm(&p, 1 << 20).unwrap(), FwdAlgo::ImplicitGemm);
    assert_eq!(backend.forward_algorithm(&p, usize::MAX).unwrap(), FwdAlgo::Gemm);
}

#[test]
fn heuristic_respects_the_limit() {
    let backend = CpuBackend::new();
    let p = problem(StorageOrder::Nchw, DataType::F32);
    assert_eq!(backend.forward_algorithm(&p, usize::MAX).unwrap(), FwdAlgo::Gemm);
    assert_eq!(backend.forward_algorithm(&p, 0).unwrap(), FwdAlgo::ImplicitGemm);
    let table = backend
        .forward_workspace_size(&p, FwdAlgo::ImplicitPrecompGemm)
        .unwrap();
    assert_eq!(
        backend.forward_algorithm(&p, table).unwrap(),
        FwdAlgo::ImplicitPrecompGemm
    );
    assert_eq!(
        backend.backward_filter_algorithm(&p, 0).unwrap(),
        BwdFilterAlgo::Algo0
    );
    assert_eq!(
        backend.backward_data_algorithm(&p, usize::MAX).unwrap(),
        BwdDataAlgo::Algo1
    );
}

#[test]
fn forward_algorithms_agree() {
    let backend = CpuBackend::new();
    for order in [StorageOrder::Nchw, StorageOrder::Nhwc] {
        let p = problem(order, DataType::F32);
        let mut x = vec![0.0f32; p.input.len()];
        let mut w = vec![0.0f32; p.filter.len()];
        fill_deterministic(&mut x, 11);
        fill_deterministic(&mut w, 12);
        let direct = run_forward(&backend, &p, FwdAlgo::ImplicitGemm, &x, &w);
        let precomp = run_forward(&backend, &p, FwdAlgo::ImplicitPrecompGemm, &x, &w);
        let gemm = run_forward(&backend, &p, FwdAlgo::Gemm, &x, &w);
        approx_eq(&precomp, &direct, 1e-5);
        approx_eq(&gemm, &direct, 1e-5);
    }
}

#[test]
fn undersized_workspace_is_a_kernel_error() {
    let backend = CpuBackend::new();
    let p = problem(StorageOrder::Nchw, DataType::F32);
    let x = vec![0.0f32; p.input.len()];
    let w = vec![0.0f32; p.filter.len()];
    let mut y = vec![0.0f32; p.output.len()];
    let mut ws = backend.alloc_workspace(4).unwrap();
    let err = backend
        .convolution_forward(&p, FwdAlgo::Gemm, &x, &w, &mut ws, &mut y)
        .unwrap_err();
    assert!(matches!(err, BackendError::KernelError(_)));
}

#[test]
fn dtype_mismatch_is_a_kernel_error() {
    let backend = CpuBackend::new();
    let p = problem(StorageOrder::Nchw, DataType::F32);
    let x = vec![f16::ZERO; p.input.len()];
    let w = vec![f16::ZERO; p.filter.len()];
    let mut y = vec![f16::ZERO; p.output.len()];
    let mut ws = backend.alloc_workspace(0).unwrap();
    let err = backend
        .convolution_forward(&p, FwdAlgo::ImplicitGemm, &x, &w, &mut ws, &mut y)
        .unwrap_err();
    assert!(matches!(err, BackendError::KernelError(_)));
}

#[test]
fn bias_add_and_bias_gradient() {
    let backend = CpuBackend::new();
    let out =
        TensorDescriptor::from_dims(StorageOrder::Nhwc, DataType::F32, &[2, 2, 2, 3]).unwrap();
    let bias = TensorDescriptor::bias(StorageOrder::Nhwc, DataType::F32, 3);
    let mut y = vec![0.0f32; out.len()];
    backend.add_bias(&bias, &[1.0, 2.0, 3.0], &out, &mut y).unwrap();
    for chunk in y.chunks(3) {
        assert_eq!(chunk, &[1.0, 2.0, 3.0]);
    }

    let mut db = vec![0.0f32; 3];
    backend
        .convolution_backward_bias(&out, &y, &bias, &mut db)
        .unwrap();
    assert_eq!(db, vec![8.0, 16.0, 24.0]);

    let wrong = TensorDescriptor::bias(StorageOrder::Nhwc, DataType::F32, 2);
    assert!(backend.add_bias(&wrong, &[1.0, 2.0], &out, &mut y).is_err());
}

#[test]
fn backward_algorithms_agree() {
    let backend = CpuBackend::new();
    let p = problem(StorageOrder::Nhwc, DataType::F32);
    let mut x = vec![0.0f32; p.input.len()];
    let mut w = vec![0.0f32; p.filter.len()];
    let mut dy = vec![0.0f32; p.output.len()];
    fill_deterministic(&mut x, 21);
    fill_deterministic(&mut w, 22);
    fill_deterministic(&mut dy, 23);

    let mut grads = Vec::new();
    for algo in [BwdFilterAlgo::Algo0, BwdFilterAlgo::Algo1] {
        let bytes = backend.backward_filter_workspace_size(&p, algo).unwrap();
        let mut ws = backend.alloc_workspace(bytes).unwrap();
        let mut dw = vec![0.0f32; p.filter.len()];
        backend
            .convolution_backward_filter(&p, algo, &x, &dy, &mut ws, &mut dw)
            .unwrap();
        grads.push(dw);
    }
    approx_eq(&grads[1], &grads[0], 1e-4);

    let mut grads = Vec::new();
    for algo in [BwdDataAlgo::Algo0, BwdDataAlgo::Algo1] {
        let bytes = backend.backward_data_workspace_size(&p, algo).unwrap();
        let mut ws = backend.alloc_workspace(bytes).unwrap();
        let mut dx = vec![0.0f32; p.input.len()];
        backend
            .convolution_backward_data(&p, algo, &w, &dy, &mut ws, &mut dx)
            .unwrap();
        grads.push(dx);
    }
    approx_eq(&grads[1], &grads[0], 1e-4);
}
