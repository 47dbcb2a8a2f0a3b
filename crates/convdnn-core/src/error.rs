use convdnn_gpu::backend::BackendError;
use convdnn_util::args::ArgError;

/// Errors returned by the convolution dispatcher.
///
/// Nothing in this crate retries: every error is handed back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConvError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("no usable algorithm: {0}")]
    NoAlgorithm(String),

    #[error("scratch arena slot poisoned by a panicking holder")]
    Poisoned,
}

impl From<ArgError> for ConvError {
    fn from(e: ArgError) -> Self {
        ConvError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConvError>;
