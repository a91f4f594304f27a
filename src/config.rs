//! # Configuration Management
//!
//! This module loads the ingestion service's configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between the TOML/env representation and these structs
//! - **derive macros**: Generate Debug, Clone, Serialize and Deserialize for us
//! - **Result<T, E>**: Loading and validation both return errors instead of panicking
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment shortcuts (HOST, PORT, PINATA_JWT, DATABASE_URL)
//! 2. Environment variables (APP_SERVER__PORT, APP_RECORDING__MAX_SESSION_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each collaborator of the recording pipeline (HTTP server, temp storage,
/// pinning service, database, identity) gets its own group so it can be
/// handed just the part it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub recording: RecordingConfig,
    pub pinning: PinningConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Live recording settings.
///
/// ## Fields:
/// - `temp_dir`: Where in-progress recordings are written before upload
/// - `file_extension`: Extension of the temporary artifact (browsers send WebM/Opus)
/// - `max_session_ms`: Hard upper bound on one recording; the session is
///   force-finalized when it elapses
/// - `max_frame_bytes`: Largest WebSocket frame accepted from a client
/// - `heartbeat_interval_secs` / `client_timeout_secs`: Ping cadence and how long
///   a silent client is tolerated before it is treated as disconnected
/// - `shutdown_drain_secs`: How long shutdown waits for in-flight uploads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub temp_dir: String,
    pub file_extension: String,
    pub max_session_ms: u64,
    pub max_frame_bytes: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub shutdown_drain_secs: u64,
}

/// Remote pinning service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinningConfig {
    /// Endpoint that accepts a multipart `file` upload and returns `IpfsHash`
    pub api_url: String,
    /// Base URL under which pinned content can be retrieved (`<gateway_url>/<cid>`)
    pub gateway_url: String,
    /// Bearer token for the pinning API
    pub jwt: String,
    pub request_timeout_secs: u64,
}

/// Upload metadata database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://data/kast.db` or `sqlite::memory:`
    pub url: String,
    pub max_connections: u32,
}

/// Caller identity settings.
///
/// Authentication itself happens upstream; by the time a recording connection
/// reaches this service the authenticated user id travels in a trusted header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub user_id_header: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            recording: RecordingConfig {
                temp_dir: "temp".to_string(),
                file_extension: "webm".to_string(),
                max_session_ms: 2 * 60 * 1000,     // two minutes
                max_frame_bytes: 1024 * 1024,      // 1 MiB
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
                shutdown_drain_secs: 30,
            },
            pinning: PinningConfig {
                api_url: "https://api.pinata.cloud/pinning/pinFileToIPFS".to_string(),
                gateway_url: "https://gateway.pinata.cloud/ipfs".to_string(),
                jwt: String::new(),
                request_timeout_secs: 120,
            },
            database: DatabaseConfig {
                url: "sqlite://data/kast.db".to_string(),
                max_connections: 5,
            },
            auth: AuthConfig {
                user_id_header: "x-user-id".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_RECORDING__MAX_SESSION_MS=60000`: One-minute recordings
    /// - `PINATA_JWT=...`: Pinning API token
    /// - `DATABASE_URL=sqlite://kast.db`: Metadata database
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Nested keys use a double underscore so field names keep their own underscores
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(jwt) = env::var("PINATA_JWT") {
            settings = settings.set_override("pinning.jwt", jwt)?;
        }

        if let Ok(url) = env::var("DATABASE_URL") {
            settings = settings.set_override("database.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - Recordings have a positive time bound and frame size
    /// - Heartbeat settings can actually detect a dead client
    /// - There is somewhere to write artifacts and a database pool to use
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.recording.max_session_ms == 0 {
            return Err(anyhow::anyhow!("Maximum session duration must be greater than 0"));
        }

        if self.recording.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum frame size must be greater than 0"));
        }

        if self.recording.heartbeat_interval_secs == 0 || self.recording.client_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval and client timeout must be greater than 0"));
        }

        if self.recording.client_timeout_secs <= self.recording.heartbeat_interval_secs {
            return Err(anyhow::anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.recording.client_timeout_secs,
                self.recording.heartbeat_interval_secs
            ));
        }

        if self.recording.temp_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Recording temp_dir cannot be empty"));
        }

        if self.recording.file_extension.trim().is_empty() {
            return Err(anyhow::anyhow!("Recording file_extension cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("Database max_connections must be greater than 0"));
        }

        Ok(())
    }
}

impl RecordingConfig {
    pub fn max_session_duration(&self) -> Duration {
        Duration::from_millis(self.max_session_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.recording.max_session_duration(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recording.max_session_ms = 0;
        assert!(config.validate().is_err());
    }

    /// A client timeout shorter than the ping interval would drop every client.
    #[test]
    fn test_heartbeat_validation() {
        let mut config = AppConfig::default();
        config.recording.heartbeat_interval_secs = 30;
        config.recording.client_timeout_secs = 30;
        assert!(config.validate().is_err());

        config.recording.client_timeout_secs = 31;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_temp_dir_rejected() {
        let mut config = AppConfig::default();
        config.recording.temp_dir = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
