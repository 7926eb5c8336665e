//! litmus version information.
//!
//! ## Notes
//!
//! - The value is taken from Cargo metadata (`CARGO_PKG_VERSION`) at compile time.
//! - The CLI `--version` output and the machine-readable summary both read this constant.

/// The litmus version string (for example, `0.1.0`).
pub const LITMUS_VERSION: &str = env!("CARGO_PKG_VERSION");
