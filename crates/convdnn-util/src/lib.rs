//! Low-level utilities shared across the convdnn crates.

pub mod args;
pub mod basics;
