use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use chassis_runtime::config::ChassisConfig;

/// Differential chassis control runtime
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// JSON chassis configuration; built-in robot constants when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match args.config {
        Some(path) => match ChassisConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Config error: {}", e);
                std::process::exit(2);
            }
        },
        None => ChassisConfig::default(),
    };

    if let Err(e) = chassis_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
