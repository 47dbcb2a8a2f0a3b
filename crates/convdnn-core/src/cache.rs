//! Shape-keyed cache of descriptors and algorithm selections.
//!
//! Input and filter shapes are tracked separately. An input change rebuilds
//! only the input descriptor; a filter change rebuilds the filter and bias
//! descriptors. Either change rebuilds the output and convolution
//! descriptors and reruns selection.

use convdnn_gpu::descriptor::{
    ConvProblem, ConvolutionDescriptor, FilterDescriptor, TensorDescriptor,
};
use convdnn_ops::element::DataType;
use convdnn_util::basics::StorageOrder;
use log::debug;

use crate::args::Padding;
use crate::error::{ConvError, Result};

/// Dims of a 4-D tensor, in storage order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ShapeKey([usize; 4]);

impl ShapeKey {
    pub fn new(dims: &[usize]) -> Result<Self> {
        <[usize; 4]>::try_from(dims)
            .map(ShapeKey)
            .map_err(|_| ConvError::Shape(format!("expected a 4-D shape, got {dims:?}")))
    }

    pub fn dims(&self) -> &[usize; 4] {
        &self.0
    }
}

/// Static convolution parameters plus the padding resolved for this call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConvParams {
    pub order: StorageOrder,
    pub dtype: DataType,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad: Padding,
}

/// Counters exposing cache behaviour.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheStats {
    pub input_rebuilds: u64,
    pub filter_rebuilds: u64,
    pub selections: u64,
}

/// Descriptors and selection valid for the last seen shapes.
#[derive(Clone, Debug)]
pub struct CachedState<S> {
    pub problem: ConvProblem,
    pub bias: TensorDescriptor,
    pub selection: S,
}

impl<S> CachedState<S> {
    pub fn input(&self) -> &TensorDescriptor {
        &self.problem.input
    }

    pub fn filter(&self) -> &FilterDescriptor {
        &self.problem.filter
    }

    pub fn output(&self) -> &TensorDescriptor {
        &self.problem.output
    }

    pub fn conv(&self) -> &ConvolutionDescriptor {
        &self.problem.conv
    }
}

#[derive(Debug)]
pub struct DescriptorCache<S> {
    input_key: Option<ShapeKey>,
    filter_key: Option<ShapeKey>,
    input: Option<TensorDescriptor>,
    filter: Option<(FilterDescriptor, TensorDescriptor)>,
    state: Option<CachedState<S>>,
    stats: CacheStats,
}

impl<S> Default for DescriptorCache<S> {
    fn default() -> Self {
        Self {
            input_key: None,
            filter_key: None,
            input: None,
            filter: None,
            state: None,
            stats: CacheStats::default(),
        }
    }
}

impl<S> DescriptorCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the cached state match `input_shape` and `filter_shape`.
    ///
    /// Returns `true` when anything was rebuilt. `select` runs only on a
    /// rebuild. On error the cache is left invalid, so the next call
    /// rebuilds again.
    pub fn ensure_current(
        &mut self,
        input_shape: &[usize],
        filter_shape: &[usize],
        params: &ConvParams,
        select: impl FnOnce(&ConvProblem) -> Result<S>,
    ) -> Result<bool> {
        let input_key = ShapeKey::new(input_shape)?;
        let filter_key = ShapeKey::new(filter_shape)?;
        let input_changed = self.input_key != Some(input_key);
        let filter_changed = self.filter_key != Some(filter_key);
        if !input_changed && !filter_changed && self.state.is_some() {
            return Ok(false);
        }
        self.state = None;

        let pad = params.pad;
        if !pad.is_symmetric() {
            return Err(ConvError::Config(format!(
                "unequal padding: top {} bottom {}, left {} right {}",
                pad.top, pad.bottom, pad.left, pad.right
            )));
        }

        let input = match self.input {
            Some(desc) if !input_changed => desc,
            _ => {
                self.input_key = None;
                let desc = TensorDescriptor::from_dims(params.order, params.dtype, input_shape)?;
                debug!("input descriptor: {input_shape:?} {}", params.order);
                self.stats.input_rebuilds += 1;
                self.input = Some(desc);
                self.input_key = Some(input_key);
                desc
            }
        };

        let (filter, bias) = match self.filter {
            Some(descs) if !filter_changed => descs,
            _ => {
                self.filter_key = None;
                let filter =
                    FilterDescriptor::from_dims(params.order, params.dtype, filter_shape)?;
                let bias = TensorDescriptor::bias(params.order, params.dtype, filter.k);
                debug!("filter descriptor: {filter_shape:?}, bias {}", filter.k);
                self.stats.filter_rebuilds += 1;
                self.filter = Some((filter, bias));
                self.filter_key = Some(filter_key);
                (filter, bias)
            }
        };

        let conv = ConvolutionDescriptor::new(pad.top, pad.left, params.stride_h, params.stride_w)?;
        let problem = ConvProblem::new(input, filter, conv)?;
        debug!("output descriptor: {:?}", problem.output.dims());

        self.stats.selections += 1;
        let selection = select(&problem)?;
        self.state = Some(CachedState {
            problem,
            bias,
            selection,
        });
        Ok(true)
    }

    /// State for the last shapes, if the last `ensure_current` succeeded.
    pub fn current(&self) -> Option<&CachedState<S>> {
        self.state.as_ref()
    }

    pub fn is_valid(&self) -> bool {
        self.state.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Forget everything; the next call rebuilds from scratch.
    pub fn clear(&mut self) {
        let stats = self.stats;
        *self = Self::default();
        self.stats = stats;
    }
}
