/// Application name, used for directory names under XDG/AppData roots.
pub const APP_NAME: &str = "flint";

/// Default flake file name looked up in the working directory.
pub const FLAKE_FILENAME: &str = "flake.lua";

/// Length of the truncated object hash used for store directory names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Marker file written into a store entry once a build completed.
pub const BUILD_COMPLETE_MARKER: &str = ".flint-complete";

/// Scratch directory inside a store entry. Removed after a successful build.
pub const BUILD_TMP_DIR: &str = "tmp";

/// Directories never copied into a build's source tree nor hashed.
pub const SOURCE_EXCLUSIONS: &[&str] = &[".git", "target", "result", ".direnv"];
