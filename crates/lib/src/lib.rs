//! flint-lib: Core types and logic for flint
//!
//! flint evaluates a Lua flake (`flake.lua`) into a content-addressed build
//! manifest and realizes it into the store:
//! - `inputs`: pinned external sources with `follows` aliasing and a lock file
//! - `toolchain`: compiler toolchain resolved from a toolchain file
//! - `build`: immutable build recipes (dependency pre-build, package build)
//! - `flake`: the per-system distribution surface (packages, apps, checks, dev shells)
//! - `execute`: DAG-ordered, parallel realization of builds

pub mod build;
pub mod consts;
pub mod eval;
pub mod execute;
pub mod flake;
pub mod gc;
pub mod inputs;
pub mod lua;
pub mod manifest;
pub mod pkgs;
pub mod placeholder;
pub mod platform;
pub mod shell;
pub mod store_lock;
pub mod toolchain;
pub mod util;
