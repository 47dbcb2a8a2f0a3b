use convdnn_core::{ConvError, ConvSession, SearchPolicy, Tensor};
use convdnn_gpu::cpu::CpuBackend;
use convdnn_util::args::ArgMap;
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

fn random(dims: &[usize], seed: u64) -> Vec<f32> {
    let mut v = vec![0.0f32; dims.iter().product()];
    fill_deterministic(&mut v, seed);
    v
}

/// NCHW -> NHWC for activations, (M, C, kh, kw) -> (M, kh, kw, C) for filters.
fn to_channels_last(v: &[f32], dims: [usize; 4]) -> Vec<f32> {
    let [n, c, h, w] = dims;
    let mut out = vec![0.0f32; v.len()];
    for ni in 0..n {
        for ci in 0..c {
            for hi in 0..h {
                for wi in 0..w {
                    out[((ni * h + hi) * w + wi) * c + ci] = v[((ni * c + ci) * h + hi) * w + wi];
                }
            }
        }
    }
    out
}

/// Plain NCHW convolution with symmetric padding.
fn reference(
    x: &[f32],
    [n, c, h, w]: [usize; 4],
    f: &[f32],
    [m, _, kh, kw]: [usize; 4],
    b: &[f32],
    stride: usize,
    pad: usize,
) -> Vec<f32> {
    let oh = (h + 2 * pad - kh) / stride + 1;
    let ow = (w + 2 * pad - kw) / stride + 1;
    let mut y = vec![0.0f32; n * m * oh * ow];
    for ni in 0..n {
        for mi in 0..m {
            for yi in 0..oh {
                for xi in 0..ow {
                    let mut acc = b[mi];
                    for ci in 0..c {
                        for i in 0..kh {
                            for j in 0..kw {
                                let ih = (yi * stride + i) as isize - pad as isize;
                                let iw = (xi * stride + j) as isize - pad as isize;
                                if ih < 0 || iw < 0 || ih as usize >= h || iw as usize >= w {
                                    continue;
                                }
                                acc += x[((ni * c + ci) * h + ih as usize) * w + iw as usize]
                                    * f[((mi * c + ci) * kh + i) * kw + j];
                            }
                        }
                    }
                    y[((ni * m + mi) * oh + yi) * ow + xi] = acc;
                }
            }
        }
    }
    y
}

#[test]
fn nhwc_forward_sums_window_plus_bias() {
    let session = ConvSession::cpu();
    let args = ArgMap::new().with("kernel", 3usize).with("order", "NHWC");
    let mut conv = session.conv::<f32>(&args).unwrap();

    let x = Tensor::from_vec(&[1, 5, 5, 3], vec![1.0; 75]).unwrap();
    let w = Tensor::from_vec(&[2, 3, 3, 3], vec![1.0; 54]).unwrap();
    let b = Tensor::from_vec(&[2], vec![0.5, -1.0]).unwrap();
    let y = conv.forward(&x, &w, &b).unwrap();

    assert_eq!(y.dims(), &[1, 3, 3, 2]);
    for pixel in y.data().chunks(2) {
        assert_eq!(pixel, &[27.5, 26.0]);
    }
}

#[test]
fn forward_matches_reference_in_every_policy() {
    let x_dims = [2, 3, 7, 6];
    let w_dims = [4, 3, 3, 3];
    let x = random(&x_dims, 1);
    let w = random(&w_dims, 2);
    let b = random(&[4], 3);
    let expected = reference(&x, x_dims, &w, w_dims, &b, 2, 1);

    for flag in [None, Some("exhaustive_search"), Some("deterministic")] {
        let session = ConvSession::cpu();
        let mut args = ArgMap::new()
            .with("kernel", 3usize)
            .with("stride", 2usize)
            .with("pad", 1usize);
        if let Some(flag) = flag {
            args.insert(flag, true);
        }
        let mut conv = session.conv::<f32>(&args).unwrap();
        let y = conv
            .forward(
                &Tensor::from_vec(&x_dims, x.clone()).unwrap(),
                &Tensor::from_vec(&w_dims, w.clone()).unwrap(),
                &Tensor::from_vec(&[4], b.clone()).unwrap(),
            )
            .unwrap();
        assert_eq!(y.dims(), &[2, 4, 4, 3]);
        approx_eq(y.data(), &expected, 1e-4);
    }
}

#[test]
fn layouts_agree() {
    let x_dims = [2, 3, 6, 6];
    let w_dims = [5, 3, 3, 3];
    let x = random(&x_dims, 4);
    let w = random(&w_dims, 5);
    let b = random(&[5], 6);
    let session = ConvSession::cpu();

    let nchw_args = ArgMap::new().with("kernel", 3usize).with("pad", 1usize);
    let y_nchw = session
        .conv::<f32>(&nchw_args)
        .unwrap()
        .forward(
            &Tensor::from_vec(&x_dims, x.clone()).unwrap(),
            &Tensor::from_vec(&w_dims, w.clone()).unwrap(),
            &Tensor::from_vec(&[5], b.clone()).unwrap(),
        )
        .unwrap();

    let nhwc_args = nchw_args.clone().with("order", "NHWC");
    let y_nhwc = session
        .conv::<f32>(&nhwc_args)
        .unwrap()
        .forward(
            &Tensor::from_vec(&[2, 6, 6, 3], to_channels_last(&x, x_dims)).unwrap(),
            &Tensor::from_vec(&[5, 3, 3, 3], to_channels_last(&w, w_dims)).unwrap(),
            &Tensor::from_vec(&[5], b).unwrap(),
        )
        .unwrap();

    assert_eq!(y_nhwc.dims(), &[2, 6, 6, 5]);
    approx_eq(
        y_nhwc.data(),
        &to_channels_last(y_nchw.data(), [2, 5, 6, 6]),
        1e-5,
    );
}

#[test]
fn fp16_tracks_f32() {
    let x_dims = [1, 2, 5, 5];
    let w_dims = [3, 2, 3, 3];
    let x = random(&x_dims, 7);
    let w = random(&w_dims, 8);
    let b = random(&[3], 9);
    let expected = reference(&x, x_dims, &w, w_dims, &b, 1, 1);

    let session = ConvSession::cpu();
    let args = ArgMap::new().with("kernel", 3usize).with("pad", 1usize);
    let mut conv = session.conv::<f16>(&args).unwrap();
    let y = conv
        .forward(
            &Tensor::from_f32(&x_dims, &x).unwrap(),
            &Tensor::from_f32(&w_dims, &w).unwrap(),
            &Tensor::from_f32(&[3], &b).unwrap(),
        )
        .unwrap();
    approx_eq(&y.to_f32(), &expected, 2e-2);
}

#[test]
fn deterministic_is_bit_identical_across_sessions() {
    let x = Tensor::from_vec(&[2, 4, 9, 9], random(&[2, 4, 9, 9], 10)).unwrap();
    let w = Tensor::from_vec(&[6, 4, 3, 3], random(&[6, 4, 3, 3], 11)).unwrap();
    let b = Tensor::from_vec(&[6], random(&[6], 12)).unwrap();
    let args = ArgMap::new()
        .with("kernel", 3usize)
        .with("deterministic", true);

    let mut outputs = Vec::new();
    for _ in 0..2 {
        let session = ConvSession::cpu();
        let mut conv = session.conv::<f32>(&args).unwrap();
        let y = conv.forward(&x, &w, &b).unwrap();
        assert_eq!(
            conv.selection().unwrap().algo,
            convdnn_gpu::algo::FwdAlgo::ImplicitPrecompGemm
        );
        outputs.push(y);
    }
    let bits = |t: &Tensor<f32>| t.data().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&outputs[0]), bits(&outputs[1]));
}

#[test]
fn exhaustive_winner_is_fastest_success() {
    let session = ConvSession::cpu();
    let args = ArgMap::new()
        .with("kernel", 3usize)
        .with("exhaustive_search", true);
    let mut conv = session.conv::<f32>(&args).unwrap();
    assert_eq!(conv.args().policy, SearchPolicy::Exhaustive);
    let x = Tensor::from_vec(&[1, 3, 8, 8], random(&[1, 3, 8, 8], 13)).unwrap();
    let w = Tensor::from_vec(&[4, 3, 3, 3], random(&[4, 3, 3, 3], 14)).unwrap();
    let b = Tensor::zeros(&[4]);
    conv.forward(&x, &w, &b).unwrap();

    let sel = conv.selection().unwrap();
    assert_eq!(sel.perf.len(), 7);
    assert_eq!(sel.perf[0].algo, sel.algo);
    let successes: Vec<_> = sel.perf.iter().filter(|p| p.is_success()).collect();
    assert_eq!(successes.len(), 3);
    for p in successes {
        assert!(sel.perf[0].time <= p.time);
    }
}

#[test]
fn heuristic_respects_workspace_limit() {
    let x = Tensor::from_vec(&[1, 3, 8, 8], random(&[1, 3, 8, 8], 15)).unwrap();
    let w = Tensor::from_vec(&[4, 3, 3, 3], random(&[4, 3, 3, 3], 16)).unwrap();
    let b = Tensor::zeros(&[4]);
    for limit in [0usize, 256, 1024, 64 << 20] {
        let session = ConvSession::cpu();
        let args = ArgMap::new()
            .with("kernel", 3usize)
            .with("workspace_byte_limit", limit);
        let mut conv = session.conv::<f32>(&args).unwrap();
        conv.forward(&x, &w, &b).unwrap();
        let sel = conv.selection().unwrap();
        assert!(
            sel.workspace_bytes <= limit,
            "{} needs {} bytes over limit {}",
            sel.algo,
            sel.workspace_bytes,
            limit
        );
        assert!(session.arena().capacity(0).unwrap() >= sel.workspace_bytes);
    }
}

#[test]
fn shape_errors_are_reported_before_compute() {
    let session = ConvSession::cpu();
    let args = ArgMap::new().with("kernel", 3usize);
    let mut conv = session.conv::<f32>(&args).unwrap();
    let x = Tensor::<f32>::zeros(&[1, 3, 5, 5]);
    let w = Tensor::<f32>::zeros(&[2, 3, 3, 3]);
    let b = Tensor::<f32>::zeros(&[2]);

    let cases = [
        (Tensor::zeros(&[3, 5, 5]), w.clone(), b.clone()),
        (x.clone(), Tensor::zeros(&[2, 4, 3, 3]), b.clone()),
        (x.clone(), Tensor::zeros(&[2, 3, 5, 5]), b.clone()),
        (x.clone(), w.clone(), Tensor::zeros(&[3])),
        (Tensor::zeros(&[1, 3, 2, 2]), w.clone(), b.clone()),
    ];
    for (x, w, b) in cases {
        let err = conv.forward(&x, &w, &b).unwrap_err();
        assert!(matches!(err, ConvError::Shape(_)), "got {err}");
    }
    assert_eq!(conv.stats().selections, 0);
}

#[test]
fn oversized_padding_is_a_shape_error() {
    let session = ConvSession::cpu();
    let args = ArgMap::new()
        .with("kernel", 3usize)
        .with("pad", i64::MAX);
    let mut conv = session.conv::<f32>(&args).unwrap();
    let err = conv
        .forward(
            &Tensor::zeros(&[1, 1, 4, 4]),
            &Tensor::zeros(&[1, 1, 3, 3]),
            &Tensor::zeros(&[1]),
        )
        .unwrap_err();
    assert!(matches!(err, ConvError::Shape(_)), "got {err}");
    assert!(conv.selection().is_none());
}

#[test]
fn construction_errors() {
    let session = ConvSession::with_slots(CpuBackend::new(), 2);
    let both = ArgMap::new()
        .with("kernel", 3usize)
        .with("exhaustive_search", true)
        .with("deterministic", true);
    assert!(matches!(
        session.conv::<f32>(&both),
        Err(ConvError::Config(_))
    ));

    let asymmetric = ArgMap::new()
        .with("kernel", 3usize)
        .with("pad_l", 1usize)
        .with("pad_r", 2usize);
    assert!(matches!(
        session.conv_gradient::<f32>(&asymmetric),
        Err(ConvError::Config(_))
    ));

    let bad_slot = ArgMap::new()
        .with("kernel", 3usize)
        .with("concurrency_slot_id", 2usize);
    assert!(matches!(
        session.conv::<f32>(&bad_slot),
        Err(ConvError::Config(_))
    ));
}

#[test]
fn same_padding_resolved_per_call() {
    let session = ConvSession::cpu();
    let args = ArgMap::new()
        .with("kernel", 2usize)
        .with("legacy_pad", "SAME");
    let mut conv = session.conv::<f32>(&args).unwrap();
    let w = Tensor::<f32>::zeros(&[1, 1, 2, 2]);
    let b = Tensor::<f32>::zeros(&[1]);
    // A 2x2 kernel needs one pixel of padding split unevenly.
    let mut y = Tensor::<f32>::zeros(&[3]);
    let err = conv
        .run(&Tensor::zeros(&[1, 1, 4, 4]), &w, &b, &mut y)
        .unwrap_err();
    assert!(matches!(err, ConvError::Config(_)), "got {err}");
    assert_eq!(y.dims(), &[3]);

    let args = ArgMap::new()
        .with("kernel", 3usize)
        .with("legacy_pad", "SAME");
    let mut conv = session.conv::<f32>(&args).unwrap();
    let y = conv
        .forward(
            &Tensor::zeros(&[1, 1, 4, 4]),
            &Tensor::zeros(&[1, 1, 3, 3]),
            &b,
        )
        .unwrap();
    assert_eq!(y.dims(), &[1, 1, 4, 4]);
}
