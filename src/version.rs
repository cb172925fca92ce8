//! Version information for the bioseqzip binary.

/// Cargo package version reported at startup and in `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
