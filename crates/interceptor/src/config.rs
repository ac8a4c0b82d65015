//! Structured options bag for the interceptor factories.
//!
//! The knobs each factory recognizes live here so a deployment can configure
//! the whole stack from one YAML document. A missing file is not an error;
//! the loader warns and falls back to defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Default, Deserialize)]
pub struct InterceptorsConfig {
    #[serde(default)]
    pub ping: PingOptions,
    #[serde(default)]
    pub encryption: EncryptionOptions,
    #[serde(default)]
    pub room: RoomOptions,
    #[serde(default)]
    pub logging: LoggingOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PingOptions {
    /// Seconds between outgoing pings.
    #[serde(default = "default_ping_interval")]
    pub interval_secs: u64,
    /// Maximum number of RTT samples kept per connection.
    #[serde(default = "default_max_history")]
    pub max_history: u16,
    /// Whether this side emits pings (the other side only answers).
    #[serde(default = "default_true")]
    pub emit: bool,
}

impl PingOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            interval_secs: default_ping_interval(),
            max_history: default_max_history(),
            emit: default_true(),
        }
    }
}

/// Which side of the key exchange this endpoint plays.
///
/// The server owns the long-lived signing key, initiates the handshake, and
/// drives session-id rotation; the client verifies and responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EncryptionOptions {
    /// Cipher selection; only `"aes256"` is recognized.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

impl Default for EncryptionOptions {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            role: default_role(),
        }
    }
}

/// The room interceptor has no runtime knobs; room policy travels in the
/// messages themselves.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomOptions {}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingOptions {
    /// Directory the per-connection traffic logs are written into.
    #[serde(default = "default_log_dir")]
    pub directory: PathBuf,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_ping_interval() -> u64 {
    30
}

fn default_max_history() -> u16 {
    64
}

fn default_true() -> bool {
    true
}

fn default_mode() -> String {
    "aes256".to_string()
}

fn default_role() -> Role {
    Role::Server
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("traffic-logs")
}

/// Load configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned and a
/// warning is emitted, so a stack can start with sensible defaults before
/// any config has been written.
pub fn load(path: &Path) -> anyhow::Result<InterceptorsConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "interceptor configuration file not found; using defaults"
        );
        return Ok(InterceptorsConfig::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config: InterceptorsConfig = serde_yml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = InterceptorsConfig::default();
        assert_eq!(config.ping.interval(), Duration::from_secs(30));
        assert_eq!(config.encryption.mode, "aes256");
        assert_eq!(config.encryption.role, Role::Server);
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let config: InterceptorsConfig = serde_yml::from_str(
            "ping:\n  interval_secs: 5\nencryption:\n  role: client\n",
        )
        .unwrap();
        assert_eq!(config.ping.interval_secs, 5);
        assert_eq!(config.ping.max_history, 64);
        assert_eq!(config.encryption.role, Role::Client);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = load(Path::new("/nonexistent/interceptors.yaml")).unwrap();
        assert!(config.ping.emit);
    }
}
