//! benchforge CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Arguments are parsed before logging comes up so --log-level can feed
    // the filter. RUST_LOG wins when both are set.
    let cli = benchforge::cli::parse_cli();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    benchforge::cli::run_with_cli(cli).await
}
