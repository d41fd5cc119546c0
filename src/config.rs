//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **CLI flags** — see [`crate::Cli`]
//! 2. **Environment variables** — `VESPER_USERNAME`, `VESPER_PASSWORD`
//! 3. **Config file** — path via `-c <path>`, or `vesper-bridge.toml` in CWD
//! 4. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [remote]
//! host = "ppp.example.com"
//! port = 6060
//!
//! [auth]
//! username = "guest"
//! password = "changeme"
//!
//! [device]
//! spec = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [modem]
//! emulate = true
//! connect_speed_bps = 33600
//! identity = "VESPER-BRIDGE"
//!
//! [session]
//! inactivity_timeout_secs = 0
//! connection_retries = 3
//!
//! [logging]
//! level = "info"
//!
//! [supervisor]
//! max_backoff_secs = 30
//! stable_threshold_secs = 30
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{BridgeError, Result};

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Remote PPP server address.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
}

/// Credentials presented during the login handshake (§4.3).
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// Local device endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device spec string, see the grammar in `device::DeviceSpec::parse`.
    #[serde(default = "default_device_spec")]
    pub spec: String,
    /// Baud rate, serial devices only (default 115200).
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Hayes AT modem emulation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModemConfig {
    /// Whether to run an AT dialogue before bridging (default false).
    #[serde(default)]
    pub emulate: bool,
    /// Virtual connect speed reported in `CONNECT <speed>` (default 33600).
    #[serde(default = "default_connect_speed")]
    pub connect_speed_bps: u32,
    /// Identity string returned by `ATI` (default "VESPER-BRIDGE").
    #[serde(default = "default_identity")]
    pub identity: String,
}

/// Bridge session timers and retry limits.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Seconds of silence before the pump exits with `InactivityTimeout`.
    /// 0 disables the timer (default 0).
    #[serde(default)]
    pub inactivity_timeout_secs: u64,
    /// Maximum connect/handshake attempts per dial (default 3).
    #[serde(default = "default_connection_retries")]
    pub connection_retries: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional file path to tee logs to, in addition to stderr.
    pub log_file: Option<String>,
}

/// Exponential backoff settings for the retry policy (§4.5).
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Cap on backoff delay in seconds (default 30).
    #[serde(default = "default_supervisor_max_backoff")]
    pub max_backoff_secs: u64,
    /// Seconds of stable ONLINE time that resets the backoff counter (default 30).
    #[serde(default = "default_supervisor_stable_threshold")]
    pub stable_threshold_secs: u64,
}

fn default_device_spec() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_connect_speed() -> u32 {
    33_600
}
fn default_identity() -> String {
    "VESPER-BRIDGE".to_string()
}
fn default_connection_retries() -> u32 {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_supervisor_max_backoff() -> u64 {
    30
}
fn default_supervisor_stable_threshold() -> u64 {
    30
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            spec: default_device_spec(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            emulate: false,
            connect_speed_bps: default_connect_speed(),
            identity: default_identity(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 0,
            connection_retries: default_connection_retries(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: default_supervisor_max_backoff(),
            stable_threshold_secs: default_supervisor_stable_threshold(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, falling back to
    /// `vesper-bridge.toml` in the current directory, then applying
    /// `VESPER_USERNAME`/`VESPER_PASSWORD` env var overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config: Config = if let Some(p) = path {
            let content = std::fs::read_to_string(p).map_err(|e| {
                BridgeError::ConfigInvalid(format!("failed to read config file {p}: {e}"))
            })?;
            toml::from_str(&content).map_err(|e| {
                BridgeError::ConfigInvalid(format!("failed to parse config file {p}: {e}"))
            })?
        } else if Path::new("vesper-bridge.toml").exists() {
            let content = std::fs::read_to_string("vesper-bridge.toml").map_err(|e| {
                BridgeError::ConfigInvalid(format!("failed to read vesper-bridge.toml: {e}"))
            })?;
            toml::from_str(&content).map_err(|e| {
                BridgeError::ConfigInvalid(format!("failed to parse vesper-bridge.toml: {e}"))
            })?
        } else {
            return Err(BridgeError::ConfigInvalid(
                "no config file found: pass -c <path> or create vesper-bridge.toml".to_string(),
            ));
        };

        if let Ok(username) = std::env::var("VESPER_USERNAME") {
            config.auth.username = username;
        }
        if let Ok(password) = std::env::var("VESPER_PASSWORD") {
            config.auth.password = password;
        }

        Ok(config)
    }

    /// Validate cross-field invariants not expressible via serde defaults.
    /// Returns every violation found rather than stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.remote.host.is_empty() {
            errors.push("remote.host must not be empty".to_string());
        }
        if self.remote.port == 0 {
            errors.push("remote.port must be between 1 and 65535".to_string());
        }
        if self.auth.username.is_empty() {
            errors.push("auth.username is required".to_string());
        }
        if self.auth.password.is_empty() {
            errors.push("auth.password is required".to_string());
        }
        if self.device.spec.is_empty() {
            errors.push("device.spec must not be empty".to_string());
        }
        if self.device.baud_rate == 0 {
            errors.push("device.baud_rate must be nonzero".to_string());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        [remote]
        host = "h"
        port = 6060

        [auth]
        username = "u"
        password = "p"
        "#
    }

    #[test]
    fn defaults_fill_in_omitted_sections() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.device.spec, "/dev/ttyUSB0");
        assert_eq!(config.device.baud_rate, 115_200);
        assert!(!config.modem.emulate);
        assert_eq!(config.modem.connect_speed_bps, 33_600);
        assert_eq!(config.session.connection_retries, 3);
        assert_eq!(config.session.inactivity_timeout_secs, 0);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.supervisor.max_backoff_secs, 30);
    }

    #[test]
    fn validate_catches_empty_required_fields() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.auth.password.clear();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("auth.password")));
    }

    #[test]
    fn validate_catches_zero_port() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.remote.port = 0;
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.contains("remote.port")));
    }

    #[test]
    fn validate_passes_on_minimal_config() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert!(config.validate().is_empty());
    }
}

