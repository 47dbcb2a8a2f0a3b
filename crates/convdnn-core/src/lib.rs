//! Shape-keyed convolution dispatch.
//!
//! A [`ConvSession`] owns a compute backend and a [`ScratchArena`]. Operators
//! built from it ([`ConvKernel`], [`ConvGradientKernel`]) validate their
//! inputs, keep descriptors and the selected algorithms in a
//! [`DescriptorCache`] keyed on the input and filter shapes, and run the
//! backend's compute calls inside their arena slot.

pub mod arena;
pub mod args;
pub mod cache;
pub mod conv;
pub mod error;
pub mod selector;
pub mod session;
pub mod tensor;

pub use arena::{ScratchArena, ScratchSlot, DEFAULT_NUM_SLOTS};
pub use args::{ConvArgs, LegacyPad, Padding, SearchPolicy, DEFAULT_WORKSPACE_LIMIT_BYTES};
pub use cache::{CacheStats, DescriptorCache, ShapeKey};
pub use conv::{ConvGradientKernel, ConvGradients, ConvKernel};
pub use error::{ConvError, Result};
pub use selector::{AlgorithmSelector, BackwardSelection, ForwardSelection, SelectorConfig};
pub use session::{ConvOpKind, ConvSession};
pub use tensor::Tensor;
