//! Input pinning.
//!
//! Inputs are the external sources a flake depends on: the toolchain overlay,
//! the package index and any build-helper libraries. They are declared in the
//! flake's `inputs` table, resolved to a local checkout, and pinned in
//! `flint.lock` so every evaluation sees the same revisions.
//!
//! - [`source`] parses input URLs
//! - [`lock`] reads and writes the lock file
//! - [`graph`] tracks transitive inputs and `follows` aliases
//! - [`fetch`] clones git inputs and resolves local paths
//! - [`resolve`] drives the whole flow

pub mod fetch;
pub mod graph;
pub mod lock;
pub mod resolve;
pub mod source;
mod types;

pub use types::*;
