//! The evaluated build graph of a flake.

mod types;

pub use types::*;
