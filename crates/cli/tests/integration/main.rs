//! CLI integration tests against isolated store and data directories.

mod build_tests;
mod common;
mod develop_tests;
mod gc_tests;
mod inputs_tests;
mod show_tests;
