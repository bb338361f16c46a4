use clap::Parser;
use tracing_subscriber::EnvFilter;

use rm_chassis_runtime::config::RuntimeConfig;

#[tokio::main]
async fn main() {
    let config = RuntimeConfig::parse();

    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init(); // installs the subscriber globally

    if let Err(e) = rm_chassis_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
