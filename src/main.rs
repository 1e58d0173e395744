//! VPN Bot - Entry Point

use anyhow::Context;
use std::sync::Arc;
use tracing::info;
use vpnbot::config::{config_path_from_args, CONFIG_PATH_ENV, PASSWORD_ENV, TOKEN_ENV};
use vpnbot::{logging, telegram, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("VPN Bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: vpnbot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config, -c <path>  Config file (default: config.json)");
        println!("  --help, -h           Show this help");
        println!();
        println!("Environment variables:");
        println!("  {:<20} Telegram bot token (required)", TOKEN_ENV);
        println!("  {:<20} SSH password of the server (required)", PASSWORD_ENV);
        println!("  {:<20} Config file path", CONFIG_PATH_ENV);
        println!("  {:<20} Log filter (default: info)", "RUST_LOG");
        return Ok(());
    }

    let config_path = config_path_from_args(&args);
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let config = Arc::new(config);

    let _log_guard = logging::init_tracing(&config.log_dir, &config.log_file, "info")?;

    info!("===========================================");
    info!("  VPN Bot v{} - Starting...", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!("Server: {}@{}:{}", config.login, config.host, config.port);
    info!("Allowed users: {:?}", config.users);
    info!("Expected clients: {:?}", config.clients);
    info!("Speed history: {:?}", config.history_file);
    info!("Rate limit: one command per {:?} per user", config.rate_limit);

    telegram::run(config).await
}
