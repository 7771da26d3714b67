//! Daemon running one Iris overlay node over TCP.

mod error;
mod logging;
mod seed;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use iris_core::bootstrap::StaticSeeder;
use iris_core::transport::tcp::TcpTransport;
use iris_core::transport::Transport;
use iris_core::Config;
use iris_core::Overlay;

use crate::error::Result;
use crate::logging::LogLevel;
use crate::seed::Seed;

#[derive(Parser, Debug)]
#[command(name = "iris-node", about = "Run one node of the Iris routing overlay")]
struct Args {
    /// Logical name of this node, hashed into its overlay id.
    #[arg(long)]
    name: String,

    /// Address to listen on for overlay sessions.
    #[arg(long, default_value = "0.0.0.0:14142")]
    listen: String,

    /// Endpoint of a known overlay member, repeatable.
    #[arg(long = "seed")]
    seeds: Vec<String>,

    /// JSON file with additional seed endpoints.
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// Seed rescan interval in seconds while bootstrapping.
    #[arg(long, default_value_t = 10)]
    rescan: u64,

    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.log_level);

    let mut seeds = args.seeds.clone();
    if let Some(path) = &args.seed_file {
        seeds.extend(Seed::load(path)?.endpoints());
    }

    let transport = TcpTransport::bind(args.name.clone(), &args.listen).await?;
    tracing::info!("listening on {}", transport.addrs().join(", "));

    let overlay = Overlay::new(args.name, Config::default(), transport)?;
    let peers = overlay
        .boot(StaticSeeder::new(seeds, Duration::from_secs(args.rescan)))
        .await?;
    tracing::info!("overlay {} booted with {peers} peers", overlay.id());

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("interrupt received, leaving the overlay");
    overlay.shutdown().await;
    Ok(())
}
