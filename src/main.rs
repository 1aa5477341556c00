//! svcrouter - relays remote service events between processes
//!
//! Command-line usage:
//!   svcrouter                      - listen with the default configuration
//!   svcrouter --config <PATH>      - load remoting settings from a JSON file
//!   svcrouter --listen <ADDR>      - override the listen address

use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use svcbus::{ConsoleControl, RouterService, TcpTransport};

#[derive(Parser, Debug)]
#[command(name = "svcrouter", version, about = "Service event router")]
struct Cli {
    /// Router configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut router = RouterService::new(TcpTransport::new(), ConsoleControl, cli.config);
    if let Some(listen) = cli.listen {
        router = router.with_listen_address(listen);
    }
    let mut quit = router.quit_signal();

    info!("🚀 Starting svcrouter");
    tokio::task::block_in_place(|| router.start()).context("router failed to start")?;
    if let Some(address) = router.transport().local_addr() {
        info!("📡 Relaying on {}", address);
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("🚪 Interrupted, shutting down");
        }
        _ = quit.changed() => {
            info!("🚪 Quit requested");
        }
    }

    tokio::task::block_in_place(|| router.stop());
    info!("✅ svcrouter stopped");
    Ok(())
}
