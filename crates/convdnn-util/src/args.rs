//! Named operator arguments.
//!
//! Operators are configured once, at construction, from a flat map of named
//! values. Booleans are stored as integers (any non-zero value is `true`), so
//! `exhaustive_search = 1` and `exhaustive_search = true` are equivalent.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgError {
    #[error("argument `{name}` has type {found}, expected {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("argument `{name}` value {value} is out of range for {expected}")]
    OutOfRange {
        name: String,
        value: String,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ArgError>;

/// A single argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Int(i64),
    Float(f32),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f32>),
    Strs(Vec<String>),
}

impl Argument {
    pub fn type_name(&self) -> &'static str {
        match self {
            Argument::Int(_) => "int",
            Argument::Float(_) => "float",
            Argument::Str(_) => "string",
            Argument::Ints(_) => "ints",
            Argument::Floats(_) => "floats",
            Argument::Strs(_) => "strings",
        }
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<usize> for Argument {
    fn from(v: usize) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<bool> for Argument {
    fn from(v: bool) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<f32> for Argument {
    fn from(v: f32) -> Self {
        Argument::Float(v)
    }
}

impl From<&str> for Argument {
    fn from(v: &str) -> Self {
        Argument::Str(v.to_string())
    }
}

impl From<String> for Argument {
    fn from(v: String) -> Self {
        Argument::Str(v)
    }
}

impl From<Vec<i64>> for Argument {
    fn from(v: Vec<i64>) -> Self {
        Argument::Ints(v)
    }
}

impl From<Vec<usize>> for Argument {
    fn from(v: Vec<usize>) -> Self {
        Argument::Ints(v.into_iter().map(|x| x as i64).collect())
    }
}

impl From<Vec<f32>> for Argument {
    fn from(v: Vec<f32>) -> Self {
        Argument::Floats(v)
    }
}

impl From<Vec<String>> for Argument {
    fn from(v: Vec<String>) -> Self {
        Argument::Strs(v)
    }
}

/// Conversion from a stored [`Argument`] into a typed scalar.
pub trait FromArgument: Sized {
    const EXPECTED: &'static str;

    fn from_argument(name: &str, arg: &Argument) -> Result<Self>;
}

fn wrong_type<T: FromArgument>(name: &str, arg: &Argument) -> ArgError {
    ArgError::WrongType {
        name: name.to_string(),
        expected: T::EXPECTED,
        found: arg.type_name(),
    }
}

impl FromArgument for i64 {
    const EXPECTED: &'static str = "int";

    fn from_argument(name: &str, arg: &Argument) -> Result<Self> {
        match arg {
            Argument::Int(v) => Ok(*v),
            other => Err(wrong_type::<Self>(name, other)),
        }
    }
}

impl FromArgument for usize {
    const EXPECTED: &'static str = "non-negative int";

    fn from_argument(name: &str, arg: &Argument) -> Result<Self> {
        let v = i64::from_argument(name, arg).map_err(|_| wrong_type::<Self>(name, arg))?;
        usize::try_from(v).map_err(|_| ArgError::OutOfRange {
            name: name.to_string(),
            value: v.to_string(),
            expected: Self::EXPECTED,
        })
    }
}

impl FromArgument for bool {
    const EXPECTED: &'static str = "int (bool)";

    fn from_argument(name: &str, arg: &Argument) -> Result<Self> {
        match arg {
            Argument::Int(v) => Ok(*v != 0),
            other => Err(wrong_type::<Self>(name, other)),
        }
    }
}

impl FromArgument for f32 {
    const EXPECTED: &'static str = "float";

    fn from_argument(name: &str, arg: &Argument) -> Result<Self> {
        match arg {
            Argument::Float(v) => Ok(*v),
            Argument::Int(v) => Ok(*v as f32),
            other => Err(wrong_type::<Self>(name, other)),
        }
    }
}

impl FromArgument for String {
    const EXPECTED: &'static str = "string";

    fn from_argument(name: &str, arg: &Argument) -> Result<Self> {
        match arg {
            Argument::Str(v) => Ok(v.clone()),
            other => Err(wrong_type::<Self>(name, other)),
        }
    }
}

/// An ordered map of named operator arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgMap {
    args: BTreeMap<String, Argument>,
}

impl ArgMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Argument>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Argument>) {
        self.args.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Argument> {
        self.args.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Argument)> {
        self.args.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Typed lookup of a scalar argument, `None` if absent.
    pub fn single<T: FromArgument>(&self, name: &str) -> Result<Option<T>> {
        self.args
            .get(name)
            .map(|arg| T::from_argument(name, arg))
            .transpose()
    }

    /// Typed lookup of a scalar argument with a default.
    pub fn single_or<T: FromArgument>(&self, name: &str, default: T) -> Result<T> {
        Ok(self.single(name)?.unwrap_or(default))
    }

    /// Lookup of an integer list, `None` if absent.
    pub fn ints(&self, name: &str) -> Result<Option<Vec<usize>>> {
        let Some(arg) = self.args.get(name) else {
            return Ok(None);
        };
        let Argument::Ints(values) = arg else {
            return Err(ArgError::WrongType {
                name: name.to_string(),
                expected: "ints",
                found: arg.type_name(),
            });
        };
        values
            .iter()
            .map(|&v| {
                usize::try_from(v).map_err(|_| ArgError::OutOfRange {
                    name: name.to_string(),
                    value: v.to_string(),
                    expected: "non-negative int",
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }
}

impl<K: Into<String>, V: Into<Argument>> FromIterator<(K, V)> for ArgMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            args: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
