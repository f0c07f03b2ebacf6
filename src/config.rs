use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Loopback address, the default for both sides.
pub const LOCALHOST: &str = "127.0.0.1";

/// Runtime configuration for both the server and the client.
///
/// Every field has a documented default; an override file is a JSON object
/// carrying only the fields it wants to change, e.g. `{"port": 7777,
/// "led_brightness_percent": 20}`. Missing fields keep their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind the server to loopback (`true`) or to the host's discovered LAN
    /// address. Default `true`.
    pub server_use_localhost: bool,
    /// Connect the client to loopback (`true`) or to `server_address`.
    /// Default `true`.
    pub client_use_localhost: bool,
    /// Host the client targets when `client_use_localhost` is off.
    /// Default empty.
    pub server_address: String,
    /// TCP port used by both sides. Default 65434.
    pub port: u16,
    /// Client-side connect/send/receive timeout in milliseconds.
    /// Default 1000.
    pub comms_timeout_ms: u64,
    /// Global brightness applied to the strip at startup, 0-100. The Blinkt
    /// LEDs are very bright; 5 is a comfortable default.
    pub led_brightness_percent: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_use_localhost: true,
            client_use_localhost: true,
            server_address: String::new(),
            port: 65434,
            comms_timeout_ms: 1000,
            led_brightness_percent: 5,
        }
    }
}

impl Config {
    /// Build the configuration: defaults, with the fields present in the
    /// optional override file merged on top. A path that cannot be read or
    /// parsed is an error; no path means pure defaults.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            None => return Ok(Config::default()),
            Some(path) => path,
        };

        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Client-side communication timeout.
    pub fn comms_timeout(&self) -> Duration {
        Duration::from_millis(self.comms_timeout_ms)
    }

    /// Host the client should connect to.
    pub fn client_host(&self) -> &str {
        if self.client_use_localhost {
            LOCALHOST
        } else {
            &self.server_address
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::load(None).unwrap();
        assert!(config.server_use_localhost);
        assert!(config.client_use_localhost);
        assert_eq!(config.port, 65434);
        assert_eq!(config.comms_timeout_ms, 1000);
        assert_eq!(config.led_brightness_percent, 5);
        assert_eq!(config.client_host(), LOCALHOST);
    }

    #[test]
    fn partial_override_keeps_remaining_defaults() {
        let path =
            std::env::temp_dir().join(format!("blinky-config-partial-{}.json", std::process::id()));
        fs::write(&path, r#"{"port": 7777, "led_brightness_percent": 20}"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.port, 7777);
        assert_eq!(config.led_brightness_percent, 20);
        assert!(config.server_use_localhost);
        assert_eq!(config.comms_timeout_ms, 1000);
    }

    #[test]
    fn client_host_follows_the_localhost_switch() {
        let path =
            std::env::temp_dir().join(format!("blinky-config-host-{}.json", std::process::id()));
        fs::write(
            &path,
            r#"{"client_use_localhost": false, "server_address": "192.168.10.20"}"#,
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.client_host(), "192.168.10.20");
    }

    #[test]
    fn unreadable_or_malformed_file_is_an_error() {
        let missing = std::env::temp_dir().join("blinky-config-does-not-exist.json");
        assert!(Config::load(Some(&missing)).is_err());

        let path =
            std::env::temp_dir().join(format!("blinky-config-bad-{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();
        let result = Config::load(Some(&path));
        fs::remove_file(&path).ok();
        assert!(result.is_err());
    }
}
