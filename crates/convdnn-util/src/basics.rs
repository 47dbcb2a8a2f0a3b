//! Core basic types and helpers.

use core::fmt;

pub const MIB: usize = 1 << 20;

/// Memory layout of a 4-D activation tensor.
///
/// `Nchw` is channel-first, `Nhwc` is channel-last. Filters follow the same
/// tag: `(M, C, kh, kw)` for `Nchw` and `(M, kh, kw, C)` for `Nhwc`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum StorageOrder {
    #[default]
    Nchw,
    Nhwc,
}

impl StorageOrder {
    /// Parse a layout tag. Unknown tags return `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "NCHW" => Some(StorageOrder::Nchw),
            "NHWC" => Some(StorageOrder::Nhwc),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageOrder::Nchw => "NCHW",
            StorageOrder::Nhwc => "NHWC",
        }
    }
}

impl fmt::Display for StorageOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_layout_tags() {
        assert_eq!(StorageOrder::from_tag("NCHW"), Some(StorageOrder::Nchw));
        assert_eq!(StorageOrder::from_tag("nhwc"), Some(StorageOrder::Nhwc));
        assert_eq!(StorageOrder::from_tag("CHWN"), None);
        assert_eq!(StorageOrder::Nhwc.to_string(), "NHWC");
    }
}
