use m3u_manager::{
    cache::ChannelCache,
    channels::{parse_m3u, Channel},
    create_app,
    source::read_playlist_file,
    AppConfig,
};
use tracing::{info, warn};
use clap::{Parser, Subcommand};
use config::Config;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Directory for cache, favorites and settings (overrides config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service (default)
    Serve,
    /// Parse a playlist file and print its channels as JSON
    Parse {
        file: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct Settings {
    server: ServerConfig,
    storage: StorageConfig,
    cache: CacheConfig,
    fetch: FetchConfig,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    host: String,
    port: u16,
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct CacheConfig {
    expiry_days: u64,
}

#[derive(Debug, Deserialize)]
struct FetchConfig {
    timeout_secs: u64,
    user_agent: String,
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let defaults = AppConfig::default();
    let settings = Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 3000_i64)?
        .set_default("storage.data_dir", defaults.data_dir.to_string_lossy().into_owned())?
        .set_default("cache.expiry_days", 7_i64)?
        .set_default("fetch.timeout_secs", defaults.fetch_timeout.as_secs() as i64)?
        .set_default("fetch.user_agent", defaults.user_agent.as_str())?
        .add_source(config::File::with_name(&args.config).required(false))
        .build()?;
    let mut settings: Settings = settings.try_deserialize()?;

    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(dir) = &args.data_dir {
        settings.storage.data_dir = dir.clone();
    }
    Ok(settings)
}

fn cache_expiry(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}

async fn parse_file(file: &Path) -> anyhow::Result<()> {
    let content = read_playlist_file(file).await?;
    let channels: Vec<Channel> = parse_m3u(content.as_str());
    info!("Parsed {} channels from {}", channels.len(), file.display());
    println!("{}", serde_json::to_string_pretty(&channels)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(Command::Parse { file }) = &args.command {
        return parse_file(file).await;
    }

    let settings = load_settings(&args)?;
    info!("Configuration loaded from {}: {:?}", args.config, settings);

    let app_config = AppConfig {
        data_dir: settings.storage.data_dir,
        cache_expiry: cache_expiry(settings.cache.expiry_days),
        fetch_timeout: Duration::from_secs(settings.fetch.timeout_secs),
        user_agent: settings.fetch.user_agent,
    };

    let cache = ChannelCache::new(&app_config.data_dir, app_config.cache_expiry);
    let channels = match cache.load().await {
        Some(cached) => {
            info!(
                "Restored {} channels from cache (source={} id=\"{}\")",
                cached.channels.len(),
                cached.source,
                cached.source_identifier
            );
            cached.channels
        }
        None => {
            warn!("No cached playlist; starting with an empty channel list");
            Vec::new()
        }
    };

    let app = create_app(app_config, channels)?;

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_expiry_days() {
        assert_eq!(cache_expiry(7), Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(cache_expiry(u64::MAX), Duration::from_secs(u64::MAX));
    }
}
