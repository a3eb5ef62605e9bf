//! Build definitions and their realization.
//!
//! A build is an immutable recipe identified by the hash of its definition.
//! Realizing it writes `<store>/build/<hash>/` exactly once; identical
//! definitions on any machine map to the same entry.
//!
//! - [`source`]: fingerprinting cargo source trees
//! - [`cargo`]: the dependency, package and interpreter-env recipes
//! - [`store`]: entry paths and completion markers
//! - [`execute`]: realizing one build

pub mod cargo;
pub mod execute;
pub mod source;
pub mod store;
mod types;

pub use types::*;
