//! Typed convolution arguments, read once from an [`ArgMap`].

use convdnn_util::args::ArgMap;
use convdnn_util::basics::{StorageOrder, MIB};

use crate::error::{ConvError, Result};

/// Default budget for heuristic algorithm selection.
pub const DEFAULT_WORKSPACE_LIMIT_BYTES: usize = 64 * MIB;

/// Legacy padding rule.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum LegacyPad {
    /// Use the explicit `pad*` arguments.
    #[default]
    NotSet,
    /// No padding.
    Valid,
    /// Pad so the output is `ceil(in / stride)`; computed per input size and
    /// may come out asymmetric.
    Same,
}

impl LegacyPad {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "NOTSET" => Some(LegacyPad::NotSet),
            "VALID" => Some(LegacyPad::Valid),
            "SAME" => Some(LegacyPad::Same),
            _ => None,
        }
    }
}

/// How algorithms are chosen for a new shape.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SearchPolicy {
    /// Ask the backend for its fastest algorithm under the workspace limit.
    #[default]
    Heuristic,
    /// Time every candidate and keep the fastest.
    Exhaustive,
    /// Fixed algorithms that give bit-identical results run to run.
    Deterministic,
}

/// Per-side padding in pixels.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct Padding {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl Padding {
    pub fn uniform(p: usize) -> Self {
        Self {
            top: p,
            left: p,
            bottom: p,
            right: p,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.top == self.bottom && self.left == self.right
    }
}

/// Static configuration of one convolution operator.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvArgs {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad: Padding,
    pub legacy_pad: LegacyPad,
    pub order: StorageOrder,
    pub workspace_limit_bytes: usize,
    pub policy: SearchPolicy,
    /// Arena slot used by every call of this operator.
    pub slot: usize,
}

impl ConvArgs {
    /// Square kernel, unit stride, no padding, defaults for everything else.
    pub fn with_kernel(kernel: usize) -> Self {
        Self {
            kernel_h: kernel,
            kernel_w: kernel,
            stride_h: 1,
            stride_w: 1,
            pad: Padding::default(),
            legacy_pad: LegacyPad::NotSet,
            order: StorageOrder::Nchw,
            workspace_limit_bytes: DEFAULT_WORKSPACE_LIMIT_BYTES,
            policy: SearchPolicy::Heuristic,
            slot: 0,
        }
    }

    /// Parse and validate operator arguments.
    ///
    /// Recognised keys: `kernel`, `kernel_h`/`kernel_w`, `kernels`; `stride`,
    /// `stride_h`/`stride_w`, `strides`; `pad`, `pad_t`/`pad_l`/`pad_b`/`pad_r`,
    /// `pads`; `legacy_pad`; `order`; `workspace_byte_limit` (or
    /// `ws_nbytes_limit`); `exhaustive_search`; `deterministic`;
    /// `concurrency_slot_id` (or `cudnn_state`).
    pub fn from_args(args: &ArgMap) -> Result<Self> {
        let (kernel_h, kernel_w) = pair(args, "kernel", "kernel_h", "kernel_w", "kernels", None)?;
        if kernel_h == 0 || kernel_w == 0 {
            return Err(ConvError::Config(format!(
                "kernel must be positive, got {kernel_h}x{kernel_w}"
            )));
        }
        let (stride_h, stride_w) = pair(args, "stride", "stride_h", "stride_w", "strides", Some(1))?;
        if stride_h == 0 || stride_w == 0 {
            return Err(ConvError::Config(format!(
                "stride must be positive, got {stride_h}x{stride_w}"
            )));
        }

        let pad = padding(args)?;
        let legacy_pad = match args.single::<String>("legacy_pad")? {
            None => LegacyPad::NotSet,
            Some(tag) => LegacyPad::from_tag(&tag)
                .ok_or_else(|| ConvError::Config(format!("unknown legacy_pad `{tag}`")))?,
        };
        if legacy_pad != LegacyPad::NotSet && pad != Padding::default() {
            return Err(ConvError::Config(
                "explicit padding cannot be combined with legacy_pad".to_string(),
            ));
        }
        if !pad.is_symmetric() {
            return Err(ConvError::Config(format!(
                "unequal padding: top {} bottom {}, left {} right {}",
                pad.top, pad.bottom, pad.left, pad.right
            )));
        }

        let order = match args.single::<String>("order")? {
            None => StorageOrder::Nchw,
            Some(tag) => StorageOrder::from_tag(&tag)
                .ok_or_else(|| ConvError::Config(format!("unknown storage order `{tag}`")))?,
        };

        let workspace_limit_bytes = match args.single::<usize>("workspace_byte_limit")? {
            Some(v) => v,
            None => args.single_or("ws_nbytes_limit", DEFAULT_WORKSPACE_LIMIT_BYTES)?,
        };

        let exhaustive = args.single_or("exhaustive_search", false)?;
        let deterministic = args.single_or("deterministic", false)?;
        let policy = match (exhaustive, deterministic) {
            (true, true) => {
                return Err(ConvError::Config(
                    "exhaustive_search and deterministic are mutually exclusive".to_string(),
                ))
            }
            (true, false) => SearchPolicy::Exhaustive,
            (false, true) => SearchPolicy::Deterministic,
            (false, false) => SearchPolicy::Heuristic,
        };

        let slot = match args.single::<usize>("concurrency_slot_id")? {
            Some(v) => v,
            None => args.single_or("cudnn_state", 0)?,
        };

        Ok(Self {
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            pad,
            legacy_pad,
            order,
            workspace_limit_bytes,
            policy,
            slot,
        })
    }

    /// Padding for an `in_h × in_w` input under the legacy rule.
    ///
    /// The result is not checked for symmetry; callers recheck it before
    /// building descriptors.
    pub fn resolve_padding(&self, in_h: usize, in_w: usize) -> Padding {
        match self.legacy_pad {
            LegacyPad::NotSet => self.pad,
            LegacyPad::Valid => Padding::default(),
            LegacyPad::Same => {
                let (top, bottom) = same_padding(in_h, self.kernel_h, self.stride_h);
                let (left, right) = same_padding(in_w, self.kernel_w, self.stride_w);
                Padding {
                    top,
                    left,
                    bottom,
                    right,
                }
            }
        }
    }
}

/// `(head, tail)` padding that yields `ceil(input / stride)` outputs.
fn same_padding(input: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let target = input.div_ceil(stride);
    let needed = ((target.saturating_sub(1)) * stride + kernel).saturating_sub(input);
    let head = needed / 2;
    (head, needed - head)
}

/// Read a 2-D extent given as one value, a per-axis pair, or a list.
fn pair(
    args: &ArgMap,
    both: &str,
    h: &str,
    w: &str,
    list: &str,
    default: Option<usize>,
) -> Result<(usize, usize)> {
    if let Some(v) = args.single::<usize>(both)? {
        return Ok((v, v));
    }
    if let Some(values) = args.ints(list)? {
        return match values.as_slice() {
            [vh, vw] => Ok((*vh, *vw)),
            _ => Err(ConvError::Config(format!(
                "`{list}` needs 2 values, got {}",
                values.len()
            ))),
        };
    }
    match (args.single::<usize>(h)?, args.single::<usize>(w)?, default) {
        (Some(vh), Some(vw), _) => Ok((vh, vw)),
        (None, None, Some(d)) => Ok((d, d)),
        (Some(v), None, Some(d)) => Ok((v, d)),
        (None, Some(v), Some(d)) => Ok((d, v)),
        _ => Err(ConvError::Config(format!(
            "missing `{both}` (or `{h}` and `{w}`)"
        ))),
    }
}

fn padding(args: &ArgMap) -> Result<Padding> {
    if let Some(p) = args.single::<usize>("pad")? {
        return Ok(Padding::uniform(p));
    }
    if let Some(values) = args.ints("pads")? {
        return match values.as_slice() {
            [top, left, bottom, right] => Ok(Padding {
                top: *top,
                left: *left,
                bottom: *bottom,
                right: *right,
            }),
            _ => Err(ConvError::Config(format!(
                "`pads` needs 4 values, got {}",
                values.len()
            ))),
        };
    }
    Ok(Padding {
        top: args.single_or("pad_t", 0)?,
        left: args.single_or("pad_l", 0)?,
        bottom: args.single_or("pad_b", 0)?,
        right: args.single_or("pad_r", 0)?,
    })
}
