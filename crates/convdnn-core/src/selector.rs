//! Algorithm selection under the heuristic, exhaustive and deterministic
//! policies.

use std::time::{Duration, Instant};

use convdnn_gpu::algo::{
    sort_by_speed, AlgoPerf, AlgoStatus, BwdDataAlgo, BwdFilterAlgo, FwdAlgo,
    NUM_BWD_DATA_ALGOS, NUM_BWD_FILTER_ALGOS, NUM_FWD_ALGOS,
};
use convdnn_gpu::backend::{Backend, BackendError};
use convdnn_gpu::descriptor::ConvProblem;
use convdnn_ops::element::Element;
use log::{debug, trace};

use crate::arena::ScratchSlot;
use crate::args::{SearchPolicy, DEFAULT_WORKSPACE_LIMIT_BYTES};
use crate::error::{ConvError, Result};

/// Tuning knobs for algorithm selection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SelectorConfig {
    /// Scratch budget for heuristic selection. Exhaustive search ignores it.
    pub workspace_limit_bytes: usize,
    /// Forward algorithms tried by exhaustive search, in enum order.
    pub forward_candidates: usize,
    pub backward_filter_candidates: usize,
    pub backward_data_candidates: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            workspace_limit_bytes: DEFAULT_WORKSPACE_LIMIT_BYTES,
            forward_candidates: NUM_FWD_ALGOS,
            backward_filter_candidates: NUM_BWD_FILTER_ALGOS,
            backward_data_candidates: NUM_BWD_DATA_ALGOS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForwardSelection {
    pub algo: FwdAlgo,
    /// Exact scratch bytes `algo` needs.
    pub workspace_bytes: usize,
    /// Benchmark table, fastest first. Empty unless searched exhaustively.
    pub perf: Vec<AlgoPerf<FwdAlgo>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackwardSelection {
    pub filter_algo: BwdFilterAlgo,
    pub data_algo: BwdDataAlgo,
    pub filter_workspace_bytes: usize,
    pub data_workspace_bytes: usize,
    /// Larger of the two requirements; one buffer serves both passes.
    pub workspace_bytes: usize,
    pub filter_perf: Vec<AlgoPerf<BwdFilterAlgo>>,
    pub data_perf: Vec<AlgoPerf<BwdDataAlgo>>,
}

#[derive(Copy, Clone, Debug)]
pub struct AlgorithmSelector {
    policy: SearchPolicy,
    config: SelectorConfig,
}

impl AlgorithmSelector {
    pub fn new(policy: SearchPolicy, config: SelectorConfig) -> Self {
        Self { policy, config }
    }

    pub fn policy(&self) -> SearchPolicy {
        self.policy
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn select_forward<B: Backend, T: Element>(
        &self,
        slot: &mut ScratchSlot<'_, B>,
        problem: &ConvProblem,
    ) -> Result<ForwardSelection> {
        let (algo, perf) = match self.policy {
            SearchPolicy::Deterministic => (FwdAlgo::ImplicitPrecompGemm, Vec::new()),
            SearchPolicy::Heuristic => (
                slot.backend()
                    .forward_algorithm(problem, self.config.workspace_limit_bytes)?,
                Vec::new(),
            ),
            SearchPolicy::Exhaustive => {
                let x = vec![T::zero(); problem.input.len()];
                let w = vec![T::zero(); problem.filter.len()];
                let mut y = vec![T::zero(); problem.output.len()];
                let all = FwdAlgo::ALL;
                let candidates = &all[..self.config.forward_candidates.min(NUM_FWD_ALGOS)];
                let perf = benchmark(
                    slot,
                    candidates,
                    |b, algo| b.forward_workspace_size(problem, algo),
                    |b, algo, ws| b.convolution_forward(problem, algo, &x, &w, ws, &mut y),
                )?;
                fastest(perf, "forward")?
            }
        };
        let workspace_bytes = slot.backend().forward_workspace_size(problem, algo)?;
        debug!(
            "forward {:?}: {} with {} workspace bytes",
            self.policy, algo, workspace_bytes
        );
        Ok(ForwardSelection {
            algo,
            workspace_bytes,
            perf,
        })
    }

    pub fn select_backward<B: Backend, T: Element>(
        &self,
        slot: &mut ScratchSlot<'_, B>,
        problem: &ConvProblem,
    ) -> Result<BackwardSelection> {
        let limit = self.config.workspace_limit_bytes;
        let (filter_algo, filter_perf, data_algo, data_perf) = match self.policy {
            SearchPolicy::Deterministic => (
                BwdFilterAlgo::Algo1,
                Vec::new(),
                BwdDataAlgo::Algo1,
                Vec::new(),
            ),
            SearchPolicy::Heuristic => {
                let backend = slot.backend();
                (
                    backend.backward_filter_algorithm(problem, limit)?,
                    Vec::new(),
                    backend.backward_data_algorithm(problem, limit)?,
                    Vec::new(),
                )
            }
            SearchPolicy::Exhaustive => {
                let x = vec![T::zero(); problem.input.len()];
                let w = vec![T::zero(); problem.filter.len()];
                let dy = vec![T::zero(); problem.output.len()];
                let mut dw = vec![T::zero(); problem.filter.len()];
                let mut dx = vec![T::zero(); problem.input.len()];

                let all = BwdFilterAlgo::ALL;
                let candidates =
                    &all[..self.config.backward_filter_candidates.min(NUM_BWD_FILTER_ALGOS)];
                let perf = benchmark(
                    slot,
                    candidates,
                    |b, algo| b.backward_filter_workspace_size(problem, algo),
                    |b, algo, ws| b.convolution_backward_filter(problem, algo, &x, &dy, ws, &mut dw),
                )?;
                let (filter_algo, filter_perf) = fastest(perf, "filter gradient")?;

                let all = BwdDataAlgo::ALL;
                let candidates =
                    &all[..self.config.backward_data_candidates.min(NUM_BWD_DATA_ALGOS)];
                let perf = benchmark(
                    slot,
                    candidates,
                    |b, algo| b.backward_data_workspace_size(problem, algo),
                    |b, algo, ws| b.convolution_backward_data(problem, algo, &w, &dy, ws, &mut dx),
                )?;
                let (data_algo, data_perf) = fastest(perf, "data gradient")?;
                (filter_algo, filter_perf, data_algo, data_perf)
            }
        };

        let backend = slot.backend();
        let filter_workspace_bytes = backend.backward_filter_workspace_size(problem, filter_algo)?;
        let data_workspace_bytes = backend.backward_data_workspace_size(problem, data_algo)?;
        let workspace_bytes = filter_workspace_bytes.max(data_workspace_bytes);
        debug!(
            "backward {:?}: filter {} ({} bytes), data {} ({} bytes)",
            self.policy, filter_algo, filter_workspace_bytes, data_algo, data_workspace_bytes
        );
        Ok(BackwardSelection {
            filter_algo,
            data_algo,
            filter_workspace_bytes,
            data_workspace_bytes,
            workspace_bytes,
            filter_perf,
            data_perf,
        })
    }
}

/// Time each candidate once in `slot`.
///
/// The slot is emptied first so stale buffers do not count against the
/// device. Candidates the backend does not implement are recorded as
/// `NotSupported`; allocation failures abort the search.
fn benchmark<B, A>(
    slot: &mut ScratchSlot<'_, B>,
    candidates: &[A],
    mut workspace_size: impl FnMut(&B, A) -> convdnn_gpu::backend::Result<usize>,
    mut run: impl FnMut(&B, A, &mut B::Ws) -> convdnn_gpu::backend::Result<()>,
) -> Result<Vec<AlgoPerf<A>>>
where
    B: Backend,
    A: Copy + std::fmt::Display,
{
    slot.reset();
    let mut perf = Vec::with_capacity(candidates.len());
    for &algo in candidates {
        let backend = slot.backend();
        let memory = match workspace_size(backend, algo) {
            Ok(bytes) => bytes,
            Err(BackendError::Unsupported(msg)) => {
                trace!("{algo}: not supported: {msg}");
                perf.push(AlgoPerf {
                    algo,
                    status: AlgoStatus::NotSupported,
                    time: Duration::ZERO,
                    memory: 0,
                });
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let ws = slot.get(memory)?;
        let start = Instant::now();
        let outcome = run(backend, algo, ws).and_then(|()| backend.synchronize());
        let time = start.elapsed();
        let status = match outcome {
            Ok(()) => AlgoStatus::Success,
            Err(BackendError::Unsupported(msg)) => {
                trace!("{algo}: not supported: {msg}");
                AlgoStatus::NotSupported
            }
            Err(e @ BackendError::OutOfMemory { .. }) => return Err(e.into()),
            Err(e) => {
                trace!("{algo}: failed: {e}");
                AlgoStatus::ExecutionFailed
            }
        };
        perf.push(AlgoPerf {
            algo,
            status,
            time,
            memory,
        });
    }
    Ok(perf)
}

/// Sort a benchmark table and return its winner.
fn fastest<A>(mut perf: Vec<AlgoPerf<A>>, pass: &str) -> Result<(A, Vec<AlgoPerf<A>>)>
where
    A: Copy + std::fmt::Display,
{
    sort_by_speed(&mut perf);
    for p in &perf {
        debug!(
            "{pass} {}: {} in {:?} using {} bytes",
            p.algo, p.status, p.time, p.memory
        );
    }
    match perf.first() {
        Some(best) if best.is_success() => Ok((best.algo, perf)),
        _ => Err(ConvError::NoAlgorithm(format!(
            "none of {} {pass} candidates ran successfully",
            perf.len()
        ))),
    }
}
