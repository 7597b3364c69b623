//! IP Reputation Aggregator CLI.

use anyhow::Result;
use clap::Parser;
use ip_reputation_aggregator::{server, Config, IpReputationAggregator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ip-reputation-aggregator")]
#[command(about = "Aggregate IP reputation from IPInfo, ProxyCheck and IP2Location")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ip-reputation.yaml")]
    config: PathBuf,

    /// Override the HTTP listen address (e.g., "0.0.0.0:8080")
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Look up a single IP, print the JSON result and exit
    #[arg(long, value_name = "IP")]
    lookup: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    // Logs go to stderr so --lookup output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let aggregator = Arc::new(IpReputationAggregator::from_config(&config)?);

    if let Some(ip) = args.lookup {
        let reputation = aggregator.check_ip(&ip).await;
        println!("{}", serde_json::to_string_pretty(&reputation)?);
        return Ok(());
    }

    let addr = match args.listen {
        Some(addr) => addr,
        None => config.listen_addr()?,
    };

    server::serve(addr, aggregator).await
}
