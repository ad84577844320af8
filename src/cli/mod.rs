//! Command-line interface for benchforge.
//!
//! Provides the `run` and `batch` commands plus the adapter/store wiring
//! they share.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
