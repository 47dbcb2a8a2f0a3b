use convdnn_core::{ConvError, ConvSession, Tensor};
use convdnn_util::args::ArgMap;
use std::time::Instant;

fn fill_deterministic(buf: &mut [f32], mut state: u64) {
    for v in buf.iter_mut() {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let x = ((state >> 33) as u32) as f32 / (u32::MAX as f32);
        *v = x * 2.0 - 1.0;
    }
}

fn ns_per_iter(elapsed: std::time::Duration, iters: usize) -> f64 {
    if iters == 0 {
        0.0
    } else {
        elapsed.as_nanos() as f64 / iters as f64
    }
}

fn parse_iters() -> usize {
    std::env::var("CONVDNN_PERF_ITERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(20)
}

fn random_tensor(dims: &[usize], seed: u64) -> Result<Tensor<f32>, ConvError> {
    let mut values = vec![0.0f32; dims.iter().product()];
    fill_deterministic(&mut values, seed);
    Tensor::from_vec(dims, values)
}

fn run(iters: usize) -> Result<(), ConvError> {
    let session = ConvSession::cpu();
    let x = random_tensor(&[8, 16, 32, 32], 1)?;
    let w = random_tensor(&[32, 16, 3, 3], 2)?;
    let b = random_tensor(&[32], 3)?;

    for (label, flag) in [
        ("heuristic", None),
        ("exhaustive", Some("exhaustive_search")),
        ("deterministic", Some("deterministic")),
    ] {
        let mut args = ArgMap::new().with("kernel", 3usize).with("pad", 1usize);
        if let Some(flag) = flag {
            args.insert(flag, true);
        }

        let mut conv = session.conv::<f32>(&args)?;
        let mut y = Tensor::zeros(&[]);
        // First call pays for descriptor setup and selection.
        let timer = Instant::now();
        conv.run(&x, &w, &b, &mut y)?;
        let setup = timer.elapsed();
        let timer = Instant::now();
        for _ in 0..iters {
            conv.run(&x, &w, &b, &mut y)?;
            std::hint::black_box(y.data()[0]);
        }
        let elapsed = timer.elapsed();
        let algo = conv.selection().map(|s| s.algo.name()).unwrap_or("-");
        println!(
            "{}_{label}: algo={algo} first_ms={:.3} iters={iters} total_ms={:.3} ns_per_iter={:.1}",
            conv.kind(),
            setup.as_secs_f64() * 1e3,
            elapsed.as_secs_f64() * 1e3,
            ns_per_iter(elapsed, iters),
        );

        let mut grad = session.conv_gradient::<f32>(&args)?;
        let dy = random_tensor(y.dims(), 4)?;
        let (mut dw, mut db, mut dx) = (Tensor::zeros(&[]), Tensor::zeros(&[]), Tensor::zeros(&[]));
        grad.run(&x, &w, &dy, &mut dw, &mut db, Some(&mut dx))?;
        let timer = Instant::now();
        for _ in 0..iters {
            grad.run(&x, &w, &dy, &mut dw, &mut db, Some(&mut dx))?;
            std::hint::black_box(dx.data()[0]);
        }
        let elapsed = timer.elapsed();
        let algos = grad
            .selection()
            .map(|s| format!("{}/{}", s.filter_algo, s.data_algo))
            .unwrap_or_default();
        println!(
            "{}_{label}: algos={algos} iters={iters} total_ms={:.3} ns_per_iter={:.1}",
            grad.kind(),
            elapsed.as_secs_f64() * 1e3,
            ns_per_iter(elapsed, iters),
        );
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let iters = parse_iters();
    if let Err(e) = run(iters) {
        eprintln!("perf_conv: {e}");
        std::process::exit(1);
    }
}
