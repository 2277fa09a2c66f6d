use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hdhr_proxy::{
    config::Config,
    web::{AppState, WebServer},
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "hdhr-proxy")]
#[command(version)]
#[command(about = "An HDHomeRun-compatible tuner emulator that multiplexes live HLS channels")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HDHR_PROXY_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Maximum concurrently tuned channels
    #[arg(short = 't', long, value_name = "COUNT")]
    max_tuners: Option<usize>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(cli: &Cli) {
    let log_filter = if cli.log_level == "trace" {
        format!("hdhr_proxy={},tower_http=trace", cli.log_level)
    } else {
        format!("hdhr_proxy={},tower_http=warn", cli.log_level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!("Starting hdhr-proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(Some(cli.config.as_path()))?;
    info!(path = %cli.config.display(), "Configuration loaded");

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(max_tuners) = cli.max_tuners {
        config.tuner.max_tuners = max_tuners;
    }

    let state = AppState::from_config(config)?;
    info!(
        channels = state.registry.len(),
        max_tuners = state.pool.max_tuners(),
        upstream = %state.config.upstream.base_url,
        "Services initialized"
    );

    let web_server = WebServer::new(state)?;
    info!("Starting web server on {}", web_server.addr());
    web_server.serve().await?;

    info!("Shutdown complete");
    Ok(())
}
