//! Forward and gradient convolution operators.

use std::marker::PhantomData;
use std::sync::Arc;

use convdnn_gpu::backend::Backend;
use convdnn_ops::element::Element;
use convdnn_ops::geometry::output_extent;
use convdnn_util::args::ArgMap;
use convdnn_util::basics::StorageOrder;

use crate::arena::ScratchArena;
use crate::args::ConvArgs;
use crate::cache::{CacheStats, CachedState, ConvParams, DescriptorCache};
use crate::error::{ConvError, Result};
use crate::selector::{AlgorithmSelector, BackwardSelection, ForwardSelection, SelectorConfig};
use crate::session::ConvOpKind;
use crate::tensor::Tensor;

/// Shapes of one call after validation.
struct CallShape {
    params: ConvParams,
    output_dims: [usize; 4],
    out_channels: usize,
}

/// Check `x` and `filter` against the operator arguments and work out the
/// output shape.
fn resolve_shape<T: Element>(
    args: &ConvArgs,
    x_dims: &[usize],
    filter_dims: &[usize],
) -> Result<CallShape> {
    let [n, a, b, c] = four_d("input", x_dims)?;
    let [m, fa, fb, fc] = four_d("filter", filter_dims)?;
    let ((channels, h, w), (filter_channels, kh, kw)) = match args.order {
        StorageOrder::Nchw => ((a, b, c), (fa, fb, fc)),
        StorageOrder::Nhwc => ((c, a, b), (fc, fa, fb)),
    };
    if filter_channels != channels {
        return Err(ConvError::Shape(format!(
            "input has {channels} channels, filter expects {filter_channels}"
        )));
    }
    if (kh, kw) != (args.kernel_h, args.kernel_w) {
        return Err(ConvError::Shape(format!(
            "filter is {kh}x{kw}, operator kernel is {}x{}",
            args.kernel_h, args.kernel_w
        )));
    }

    let pad = args.resolve_padding(h, w);
    let out_h = output_extent(h, kh, args.stride_h, pad.top, pad.bottom);
    let out_w = output_extent(w, kw, args.stride_w, pad.left, pad.right);
    let (Some(out_h), Some(out_w)) = (out_h, out_w) else {
        return Err(ConvError::Shape(format!(
            "{kh}x{kw} kernel does not fit {h}x{w} input with padding {pad:?}"
        )));
    };
    let output_dims = match args.order {
        StorageOrder::Nchw => [n, m, out_h, out_w],
        StorageOrder::Nhwc => [n, out_h, out_w, m],
    };
    Ok(CallShape {
        params: ConvParams {
            order: args.order,
            dtype: T::DATA_TYPE,
            stride_h: args.stride_h,
            stride_w: args.stride_w,
            pad,
        },
        output_dims,
        out_channels: m,
    })
}

fn four_d(what: &str, dims: &[usize]) -> Result<[usize; 4]> {
    <[usize; 4]>::try_from(dims)
        .map_err(|_| ConvError::Shape(format!("{what} must be 4-D, got {dims:?}")))
}

fn check_bias(bias_dims: &[usize], out_channels: usize, what: &str) -> Result<()> {
    if bias_dims != [out_channels] {
        return Err(ConvError::Shape(format!(
            "{what} has shape {bias_dims:?}, expected [{out_channels}]"
        )));
    }
    Ok(())
}

fn selector_for(args: &ConvArgs) -> AlgorithmSelector {
    AlgorithmSelector::new(
        args.policy,
        SelectorConfig {
            workspace_limit_bytes: args.workspace_limit_bytes,
            ..SelectorConfig::default()
        },
    )
}

/// Forward convolution with fused bias: `y = conv(x, filter) + bias`.
pub struct ConvKernel<B: Backend, T: Element> {
    args: ConvArgs,
    selector: AlgorithmSelector,
    arena: Arc<ScratchArena<B>>,
    cache: DescriptorCache<ForwardSelection>,
    _elem: PhantomData<T>,
}

impl<B: Backend, T: Element> ConvKernel<B, T> {
    pub fn new(args: ConvArgs, arena: Arc<ScratchArena<B>>) -> Result<Self> {
        arena.check_slot(args.slot)?;
        Ok(Self {
            selector: selector_for(&args),
            args,
            arena,
            cache: DescriptorCache::new(),
            _elem: PhantomData,
        })
    }

    pub fn from_args(args: &ArgMap, arena: Arc<ScratchArena<B>>) -> Result<Self> {
        Self::new(ConvArgs::from_args(args)?, arena)
    }

    pub fn args(&self) -> &ConvArgs {
        &self.args
    }

    pub fn kind(&self) -> ConvOpKind {
        ConvOpKind::of::<T>(false)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Algorithm and workspace chosen for the last shapes.
    pub fn selection(&self) -> Option<&ForwardSelection> {
        self.cache.current().map(|state| &state.selection)
    }

    pub fn state(&self) -> Option<&CachedState<ForwardSelection>> {
        self.cache.current()
    }

    /// Compute `y`, resizing it to the output shape.
    ///
    /// `y` is left untouched when the call fails before any kernel runs.
    pub fn run(
        &mut self,
        x: &Tensor<T>,
        filter: &Tensor<T>,
        bias: &Tensor<T>,
        y: &mut Tensor<T>,
    ) -> Result<()> {
        let shape = resolve_shape::<T>(&self.args, x.dims(), filter.dims())?;
        check_bias(bias.dims(), shape.out_channels, "bias")?;

        let Self {
            args,
            selector,
            arena,
            cache,
            ..
        } = self;
        arena.with_slot(args.slot, |scratch| {
            cache.ensure_current(x.dims(), filter.dims(), &shape.params, |problem| {
                selector.select_forward::<B, T>(scratch, problem)
            })?;
            let Some(state) = cache.current() else {
                return Err(ConvError::Config("descriptor cache not populated".to_string()));
            };
            y.resize(&shape.output_dims);
            let backend = scratch.backend();
            let ws = scratch.get(state.selection.workspace_bytes)?;
            backend.convolution_forward(
                &state.problem,
                state.selection.algo,
                x.data(),
                filter.data(),
                ws,
                y.data_mut(),
            )?;
            backend.add_bias(&state.bias, bias.data(), state.output(), y.data_mut())?;
            Ok(())
        })
    }

    /// Allocate and return the output.
    pub fn forward(
        &mut self,
        x: &Tensor<T>,
        filter: &Tensor<T>,
        bias: &Tensor<T>,
    ) -> Result<Tensor<T>> {
        let mut y = Tensor::zeros(&[]);
        self.run(x, filter, bias, &mut y)?;
        Ok(y)
    }
}

/// Gradients computed by [`ConvGradientKernel::backward`].
#[derive(Clone, Debug, PartialEq)]
pub struct ConvGradients<T> {
    pub dfilter: Tensor<T>,
    pub dbias: Tensor<T>,
    pub dx: Option<Tensor<T>>,
}

/// Backward convolution: bias, filter and optionally input gradients.
pub struct ConvGradientKernel<B: Backend, T: Element> {
    args: ConvArgs,
    selector: AlgorithmSelector,
    arena: Arc<ScratchArena<B>>,
    cache: DescriptorCache<BackwardSelection>,
    _elem: PhantomData<T>,
}

impl<B: Backend, T: Element> ConvGradientKernel<B, T> {
    pub fn new(args: ConvArgs, arena: Arc<ScratchArena<B>>) -> Result<Self> {
        arena.check_slot(args.slot)?;
        Ok(Self {
            selector: selector_for(&args),
            args,
            arena,
            cache: DescriptorCache::new(),
            _elem: PhantomData,
        })
    }

    pub fn from_args(args: &ArgMap, arena: Arc<ScratchArena<B>>) -> Result<Self> {
        Self::new(ConvArgs::from_args(args)?, arena)
    }

    pub fn args(&self) -> &ConvArgs {
        &self.args
    }

    pub fn kind(&self) -> ConvOpKind {
        ConvOpKind::of::<T>(true)
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn selection(&self) -> Option<&BackwardSelection> {
        self.cache.current().map(|state| &state.selection)
    }

    pub fn state(&self) -> Option<&CachedState<BackwardSelection>> {
        self.cache.current()
    }

    /// Compute `dfilter`, `dbias` and, when requested, `dx`.
    ///
    /// Outputs are resized to match `filter`, the output channel count and
    /// `x` respectively. With `dx == None` no input gradient is computed.
    pub fn run(
        &mut self,
        x: &Tensor<T>,
        filter: &Tensor<T>,
        dy: &Tensor<T>,
        dfilter: &mut Tensor<T>,
        dbias: &mut Tensor<T>,
        dx: Option<&mut Tensor<T>>,
    ) -> Result<()> {
        let shape = resolve_shape::<T>(&self.args, x.dims(), filter.dims())?;
        if dy.dims() != shape.output_dims {
            return Err(ConvError::Shape(format!(
                "output gradient has shape {:?}, expected {:?}",
                dy.dims(),
                shape.output_dims
            )));
        }

        let Self {
            args,
            selector,
            arena,
            cache,
            ..
        } = self;
        arena.with_slot(args.slot, |scratch| {
            cache.ensure_current(x.dims(), filter.dims(), &shape.params, |problem| {
                selector.select_backward::<B, T>(scratch, problem)
            })?;
            let Some(state) = cache.current() else {
                return Err(ConvError::Config("descriptor cache not populated".to_string()));
            };
            dfilter.resize_like(filter);
            dbias.resize(&[shape.out_channels]);
            let backend = scratch.backend();
            backend.convolution_backward_bias(
                state.output(),
                dy.data(),
                &state.bias,
                dbias.data_mut(),
            )?;

            let sel = &state.selection;
            let ws = scratch.get(sel.workspace_bytes)?;
            backend.convolution_backward_filter(
                &state.problem,
                sel.filter_algo,
                x.data(),
                dy.data(),
                ws,
                dfilter.data_mut(),
            )?;

            if let Some(dx) = dx {
                dx.resize_like(x);
                backend.convolution_backward_data(
                    &state.problem,
                    sel.data_algo,
                    filter.data(),
                    dy.data(),
                    ws,
                    dx.data_mut(),
                )?;
            }
            Ok(())
        })
    }

    /// Allocate and return the gradients.
    pub fn backward(
        &mut self,
        x: &Tensor<T>,
        filter: &Tensor<T>,
        dy: &Tensor<T>,
        compute_dx: bool,
    ) -> Result<ConvGradients<T>> {
        let mut dfilter = Tensor::zeros(&[]);
        let mut dbias = Tensor::zeros(&[]);
        let mut dx = compute_dx.then(|| Tensor::zeros(&[]));
        self.run(x, filter, dy, &mut dfilter, &mut dbias, dx.as_mut())?;
        Ok(ConvGradients { dfilter, dbias, dx })
    }
}
