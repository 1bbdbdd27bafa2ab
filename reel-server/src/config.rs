//! Server configuration (CLI flags with env fallbacks).

use clap::Parser;

/// Placeholder secret for local development. `main` warns when it is in use.
pub const DEV_TOKEN_SECRET: &str = "reel-dev-secret";

#[derive(Parser, Debug, Clone)]
#[command(name = "reel-server", about = "Presence and notification gateway")]
pub struct ServerConfig {
    /// Address for the HTTP/WebSocket listener.
    #[arg(long, env = "REEL_LISTEN_ADDR", default_value = "127.0.0.1:4600")]
    pub listen_addr: String,

    /// Redis URL for the shared presence store. Required for multi-instance
    /// deployments; without it presence is kept in process memory.
    #[arg(long, env = "REEL_REDIS_URL")]
    pub redis_url: Option<String>,

    /// SQLite database path (user directory + durable notifications).
    /// Without it the server runs push-only.
    #[arg(long, env = "REEL_DB_PATH")]
    pub db_path: Option<String>,

    /// Base URL of the friendship service, e.g. "http://friends:8080".
    /// Without it presence broadcasts have no audience.
    #[arg(long, env = "REEL_FRIENDS_URL")]
    pub friends_url: Option<String>,

    /// HMAC secret used to validate bearer tokens.
    #[arg(long, env = "REEL_TOKEN_SECRET", default_value = DEV_TOKEN_SECRET)]
    pub token_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:0".to_string(),
            redis_url: None,
            db_path: None,
            friends_url: None,
            token_secret: DEV_TOKEN_SECRET.to_string(),
        }
    }
}
