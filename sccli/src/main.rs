//! sccli - SecurityCenter bulk export/import tool
use clap::Parser;
use log::error;
use sccli::{Cli, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // --debug raises the default level; RUST_LOG still wins
    let default_filter = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(e) = run(cli).await {
        error!("❌ {e}");
        std::process::exit(1);
    }
}
