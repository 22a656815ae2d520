use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use argus_client::client::HttpClientFactory;
use argus_node::config::Config;
use argus_node::logging;
use argus_node::node::{generate_monitor_nonce, Monitor};

#[derive(Parser, Debug)]
#[command(name = "argus", about = "Monitor the peer-to-peer layer of a chain network from the outside")]
struct Cli {
    /// Path to the monitor config file
    #[arg(short, long, env = "ARGUS_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_filepath(&cli.config)?;
    logging::init_logging(
        config.logs_path.clone(),
        config.logs_enabled,
        config.log_level.clone(),
    )?;

    let own_nonce = generate_monitor_nonce();
    log::info!("starting monitor with nonce {}", own_nonce);

    let factory = Arc::new(HttpClientFactory::new(config.request_timeout()));
    let mut monitor = Monitor::new(&config, own_nonce, factory)?;
    monitor.start().await?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    monitor.stop().await;

    Ok(())
}
