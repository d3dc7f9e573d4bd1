//! reconcile - on-chain balance reconciliation tool
//!
//! Checks a batch of reported wallet balances against the chains they live on,
//! at the current head or at a historical point in time.

use chainrecon::cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging; stdout is reserved for the report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
