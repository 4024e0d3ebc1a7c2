use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use botrouterd::bootstrap::Server;
use botrouterd::config::Config;
use botrouterd::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "botrouterd")]
#[command(author, version, about = "Multi-tenant webhook router for chat-platform bots")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = Config::load(&args.config)?;

    let tracing_config = TracingConfig {
        service_name: "botrouterd".to_string(),
        log_level: config.log_level.clone(),
        json_logs: config.json_logs,
    };

    init_tracing(&tracing_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting botrouterd"
    );

    info!(
        tenants = config.tenants.len(),
        workers = config.scheduler.worker_pool_size,
        listen = %config.listen,
        "configuration loaded"
    );

    // Validate only mode
    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    let server = Server::new(config, args.config);
    server.run().await?;

    Ok(())
}
