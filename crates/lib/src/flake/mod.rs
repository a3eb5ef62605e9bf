//! The distribution surface of an evaluated flake.
//!
//! Every system a flake is evaluated for yields a [`SystemOutputs`]: named
//! packages, apps, checks and dev shells. Packages and checks are build
//! hashes into the shared [`Manifest`](crate::manifest::Manifest), so a
//! package, the app running it and the check building it are one build.

pub mod outputs;
pub mod shell;

pub use outputs::{App, FlakeOutputs, OutputError, OutputKind, OutputRef, SystemOutputs};
pub use shell::{DevShell, ShellPackage};
