//! Configuration management

use std::net::SocketAddr;

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Header carrying the shared trigger secret.
pub const TRIGGER_SECRET_HEADER: &str = "x-tally-trigger-secret";

/// Trigger server configuration
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
    /// Shared secret expected in [`TRIGGER_SECRET_HEADER`]
    pub trigger_secret: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field("trigger_secret", &"<redacted>")
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = ServerConfig {
            host: std::env::var("TALLY_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
            port: std::env::var("TALLY_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SERVER_PORT),
            shutdown_timeout_secs: std::env::var("TALLY_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            trigger_secret: std::env::var("TALLY_TRIGGER_SECRET").unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.trigger_secret.trim().is_empty() {
            anyhow::bail!("TALLY_TRIGGER_SECRET must be set");
        }

        Ok(())
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
