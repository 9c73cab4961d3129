//! corfs command-line entry point.
//!
//! ```bash
//! corfs --primary /mnt/remote --cache ~/.cache/corfs warm /reports
//! RUST_LOG=corfs=debug corfs --primary /mnt/remote --cache ~/.cache/corfs cat /reports/q3.csv
//! ```

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use corfs_cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries file contents.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("corfs_cli=info".parse()?))
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();
    corfs_cli::run(cli, &mut stdout).await
}
