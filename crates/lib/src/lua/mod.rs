//! The Lua side of a flake.
//!
//! A flake file is evaluated in a fresh VM per system. The VM exposes a
//! `flake` global whose functions register builds into a shared manifest and
//! return references to them.
//!
//! - [`entrypoint`] reads the table a flake file returns
//! - [`globals`] registers the `flake` table
//! - [`refs`] converts builds, toolchains and sources to and from Lua
//! - [`outputs`] turns the table `outputs()` returns into [`SystemOutputs`](crate::flake::SystemOutputs)
//! - [`runtime`] creates VMs and loads files

pub mod entrypoint;
pub mod globals;
pub mod outputs;
pub mod refs;
pub mod runtime;
