// GhostBridge Daemon (bridged)
//
// Edge gateway terminating HTTP/2 and HTTP/3 client traffic and routing
// it to backend RPC services, with an embedded ZNS resolver:
// - Dual-transport ingress (TCP+TLS and QUIC)
// - Channel multiplexing (wallet, identity, ledger, dns, contracts, proxy)
// - Local name resolution with ENS/Unstoppable/DNS bridges
// - Metrics, alerting and subscription delivery

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use bridged::{BridgeConfig, BridgeDaemon};

#[derive(Parser)]
#[command(
    name = "bridged",
    version = ghostbridge_shared::get_version(),
    about = "GhostBridge edge gateway with embedded ZNS resolution",
    long_about = "Dual-transport (HTTP/2 + HTTP/3) gateway that multiplexes client \
                  traffic onto backend service channels and answers name queries locally"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(short, long)]
    config: Option<String>,

    #[arg(long, default_value = "false")]
    testnet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway daemon
    Start {
        #[arg(long)]
        http2_port: Option<u16>,

        #[arg(long)]
        http3_port: Option<u16>,

        #[arg(long)]
        bind_address: Option<String>,
    },

    /// Write a default configuration file
    InitConfig {
        #[arg(long, default_value = "bridged.toml")]
        path: String,
    },

    /// Validate a configuration file and print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!("bridged={0},zns={0},ghostbridge_shared={0}", cli.log_level))
        .with_target(false)
        .init();

    info!(
        "👻 Starting GhostBridge (bridged) v{}",
        ghostbridge_shared::get_version()
    );

    // Initialize shared library
    ghostbridge_shared::init()?;

    let mut config = if let Some(path) = &cli.config {
        BridgeConfig::from_file(path)?
    } else if cli.testnet {
        info!("🧪 Running in testnet mode");
        BridgeConfig::testnet()
    } else {
        BridgeConfig::default()
    };

    match cli.command {
        Commands::Start {
            http2_port,
            http3_port,
            bind_address,
        } => {
            if let Some(port) = http2_port {
                config.network.http2_port = port;
            }
            if let Some(port) = http3_port {
                config.network.http3_port = port;
            }
            if let Some(address) = bind_address {
                config.network.server_address = address;
            }
            run_daemon(config).await
        }
        Commands::InitConfig { path } => {
            BridgeConfig::default().save_to_file(&path)?;
            info!("📝 Wrote default configuration to {}", path);
            Ok(())
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration OK");
            println!("  bind address: {}", config.network.server_address);
            println!("  http2 port:   {}", config.network.http2_port);
            println!("  http3 port:   {}", config.network.http3_port);
            println!("  channels:     {}", config.channels.len());
            println!(
                "  bridges:      ens={} ud={} dns_fallback={}",
                config.zns.resolver.enable_ens_bridge,
                config.zns.resolver.enable_ud_bridge,
                config.zns.resolver.enable_dns_fallback
            );
            Ok(())
        }
    }
}

async fn run_daemon(config: BridgeConfig) -> Result<()> {
    let mut daemon = BridgeDaemon::new(config)?;

    if let Err(e) = daemon.start().await {
        error!("❌ Failed to start gateway: {}", e);
        return Err(e);
    }

    signal::ctrl_c().await?;
    info!("🛑 Received shutdown signal");

    daemon.stop(Duration::from_secs(10)).await;
    Ok(())
}
