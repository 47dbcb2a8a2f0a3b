use std::fmt;
use std::sync::Arc;

use convdnn_gpu::backend::Backend;
use convdnn_gpu::cpu::CpuBackend;
use convdnn_ops::element::{DataType, Element};
use convdnn_util::args::ArgMap;
use log::{debug, info};

use crate::arena::{ScratchArena, DEFAULT_NUM_SLOTS};
use crate::conv::{ConvGradientKernel, ConvKernel};
use crate::error::Result;

/// The operators this crate exposes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ConvOpKind {
    Conv,
    ConvGradient,
    ConvFp16,
    ConvFp16Gradient,
}

impl fmt::Display for ConvOpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ConvOpKind {
    pub const ALL: [ConvOpKind; 4] = [
        ConvOpKind::Conv,
        ConvOpKind::ConvGradient,
        ConvOpKind::ConvFp16,
        ConvOpKind::ConvFp16Gradient,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ConvOpKind::Conv => "Conv",
            ConvOpKind::ConvGradient => "ConvGradient",
            ConvOpKind::ConvFp16 => "ConvFp16",
            ConvOpKind::ConvFp16Gradient => "ConvFp16Gradient",
        }
    }

    /// The operator computing element type `T`, forward or gradient.
    pub fn of<T: Element>(gradient: bool) -> Self {
        match (T::DATA_TYPE, gradient) {
            (DataType::F32, false) => ConvOpKind::Conv,
            (DataType::F32, true) => ConvOpKind::ConvGradient,
            (DataType::F16, false) => ConvOpKind::ConvFp16,
            (DataType::F16, true) => ConvOpKind::ConvFp16Gradient,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn data_type(self) -> DataType {
        match self {
            ConvOpKind::Conv | ConvOpKind::ConvGradient => DataType::F32,
            ConvOpKind::ConvFp16 | ConvOpKind::ConvFp16Gradient => DataType::F16,
        }
    }

    pub fn is_gradient(self) -> bool {
        matches!(self, ConvOpKind::ConvGradient | ConvOpKind::ConvFp16Gradient)
    }
}

/// A backend plus the scratch arena shared by every operator built from it.
pub struct ConvSession<B: Backend> {
    backend: Arc<B>,
    arena: Arc<ScratchArena<B>>,
}

impl<B: Backend> ConvSession<B> {
    pub fn new(backend: B) -> Self {
        Self::with_slots(backend, DEFAULT_NUM_SLOTS)
    }

    pub fn with_slots(backend: B, num_slots: usize) -> Self {
        let backend = Arc::new(backend);
        info!(
            "conv session on {} with {} scratch slots",
            backend.caps().name,
            num_slots
        );
        let arena = Arc::new(ScratchArena::with_slots(Arc::clone(&backend), num_slots));
        Self { backend, arena }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn arena(&self) -> &Arc<ScratchArena<B>> {
        &self.arena
    }

    /// Forward operator for element type `T` (`Conv` for f32, `ConvFp16` for f16).
    pub fn conv<T: Element>(&self, args: &ArgMap) -> Result<ConvKernel<B, T>> {
        let kernel = ConvKernel::from_args(args, Arc::clone(&self.arena))?;
        debug!("built {} on slot {}", kernel.kind(), kernel.args().slot);
        Ok(kernel)
    }

    pub fn conv_gradient<T: Element>(&self, args: &ArgMap) -> Result<ConvGradientKernel<B, T>> {
        let kernel = ConvGradientKernel::from_args(args, Arc::clone(&self.arena))?;
        debug!("built {} on slot {}", kernel.kind(), kernel.args().slot);
        Ok(kernel)
    }
}

impl ConvSession<CpuBackend> {
    pub fn cpu() -> Self {
        Self::new(CpuBackend::new())
    }
}

impl<B: Backend> Clone for ConvSession<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            arena: Arc::clone(&self.arena),
        }
    }
}
