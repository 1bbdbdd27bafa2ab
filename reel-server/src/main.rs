use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (REEL_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("REEL_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("reel_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = reel_server::config::ServerConfig::parse();
    tracing::info!("Starting presence gateway on {}", config.listen_addr);
    if config.redis_url.is_none() {
        tracing::warn!("No --redis-url: presence state is process-local and lost on restart");
    }
    if config.db_path.is_none() {
        tracing::warn!("No --db-path: durable notifications disabled, directory checks open");
    }
    if config.token_secret == reel_server::config::DEV_TOKEN_SECRET {
        tracing::warn!("Using the development token secret — set REEL_TOKEN_SECRET");
    }

    let server = reel_server::server::Server::new(config);
    server.run().await
}
