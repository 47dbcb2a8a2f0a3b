use core::fmt;
use std::time::Duration;

/// Forward algorithms a backend may implement.
pub const NUM_FWD_ALGOS: usize = 7;
/// Filter-gradient algorithms a backend may implement.
pub const NUM_BWD_FILTER_ALGOS: usize = 4;
/// Data-gradient algorithms a backend may implement.
pub const NUM_BWD_DATA_ALGOS: usize = 5;

macro_rules! algorithm_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $count:ident {
            $($variant:ident => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: [$name; $count] = [$($name::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

algorithm_enum! {
    /// Forward convolution algorithm.
    FwdAlgo, NUM_FWD_ALGOS {
        ImplicitGemm => "IMPLICIT_GEMM",
        ImplicitPrecompGemm => "IMPLICIT_PRECOMP_GEMM",
        Gemm => "GEMM",
        Direct => "DIRECT",
        Fft => "FFT",
        FftTiling => "FFT_TILING",
        Winograd => "WINOGRAD",
    }
}

algorithm_enum! {
    /// Filter-gradient algorithm.
    BwdFilterAlgo, NUM_BWD_FILTER_ALGOS {
        Algo0 => "BWD_FILTER_ALGO_0",
        Algo1 => "BWD_FILTER_ALGO_1",
        Fft => "BWD_FILTER_FFT",
        Algo3 => "BWD_FILTER_ALGO_3",
    }
}

algorithm_enum! {
    /// Data-gradient algorithm.
    BwdDataAlgo, NUM_BWD_DATA_ALGOS {
        Algo0 => "BWD_DATA_ALGO_0",
        Algo1 => "BWD_DATA_ALGO_1",
        Fft => "BWD_DATA_FFT",
        FftTiling => "BWD_DATA_FFT_TILING",
        Winograd => "BWD_DATA_WINOGRAD",
    }
}

/// Outcome of benchmarking one candidate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AlgoStatus {
    Success,
    /// The backend does not implement this algorithm for the problem.
    NotSupported,
    /// The algorithm was attempted and the backend reported an error.
    ExecutionFailed,
}

impl fmt::Display for AlgoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgoStatus::Success => f.write_str("success"),
            AlgoStatus::NotSupported => f.write_str("not-supported"),
            AlgoStatus::ExecutionFailed => f.write_str("execution-failed"),
        }
    }
}

/// One row of an exhaustive search: (algorithm, status, time, memory).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AlgoPerf<A> {
    pub algo: A,
    pub status: AlgoStatus,
    pub time: Duration,
    /// Scratch bytes the algorithm required.
    pub memory: usize,
}

impl<A: Copy> AlgoPerf<A> {
    pub fn is_success(&self) -> bool {
        self.status == AlgoStatus::Success
    }
}

/// Order benchmark rows successful-first, then by ascending time.
///
/// The sort is stable, so ties keep candidate order.
pub fn sort_by_speed<A>(perf: &mut [AlgoPerf<A>]) {
    perf.sort_by(|a, b| {
        let rank = |p: &AlgoPerf<A>| p.status != AlgoStatus::Success;
        rank(a).cmp(&rank(b)).then(a.time.cmp(&b.time))
    });
}
