//! Configuration management
//!
//! Loads and saves the YAML settings file: MIDI source matching, OBS
//! connection record, gateway ports, and the tunable timing constants.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obs: Option<ObsConfig>,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tunables: Tunables,
}

/// MIDI source configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Input port name patterns (case-insensitive substring). Empty means
    /// connect to every available input.
    #[serde(default)]
    pub sources: Vec<String>,
}

/// OBS WebSocket connection record
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObsConfig {
    #[serde(default = "default_obs_host")]
    pub host: String,
    #[serde(default = "default_obs_port")]
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for ObsConfig {
    fn default() -> Self {
        Self {
            host: default_obs_host(),
            port: default_obs_port(),
            password: None,
        }
    }
}

/// Remote gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Preferred listen port; one dynamic-port fallback if already bound
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// UDP beacon port for discovery announcements
    #[serde(default = "default_beacon_port")]
    pub beacon_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_gateway_port(),
            beacon_port: default_beacon_port(),
        }
    }
}

/// Timing constants the rest of the system treats as configuration, not law
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tunables {
    /// Minimum re-fire interval for discrete triggers (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Client-side value push throttle (ms)
    #[serde(default = "default_throttle_ms")]
    pub value_throttle_ms: u64,
    /// Empty-snapshot refresh retries before giving up
    #[serde(default = "default_refresh_retries")]
    pub refresh_retries: u32,
    /// Delay between empty-snapshot retries (ms)
    #[serde(default = "default_refresh_retry_delay_ms")]
    pub refresh_retry_delay_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            value_throttle_ms: default_throttle_ms(),
            refresh_retries: default_refresh_retries(),
            refresh_retry_delay_ms: default_refresh_retry_delay_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_obs_host() -> String {
    "localhost".to_string()
}
fn default_obs_port() -> u16 {
    4455
}
fn default_gateway_port() -> u16 {
    9763
}
fn default_beacon_port() -> u16 {
    9764
}
fn default_debounce_ms() -> u64 {
    180
}
fn default_throttle_ms() -> u64 {
    80
}
fn default_refresh_retries() -> u32 {
    3
}
fn default_refresh_retry_delay_ms() -> u64 {
    250
}

impl AppConfig {
    /// Load configuration from a YAML file; a missing file yields defaults
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save configuration to a YAML file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = AppConfig::default();
        assert_eq!(config.tunables.debounce_ms, 180);
        assert_eq!(config.tunables.value_throttle_ms, 80);
        assert_eq!(config.tunables.refresh_retries, 3);
        assert_eq!(config.tunables.refresh_retry_delay_ms, 250);
        assert_eq!(config.gateway.port, 9763);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
obs:
  host: studio-pc
  password: hunter2
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let obs = config.obs.unwrap();
        assert_eq!(obs.host, "studio-pc");
        assert_eq!(obs.port, 4455);
        assert_eq!(config.tunables.debounce_ms, 180);
        assert!(config.gateway.enabled);
    }

    #[test]
    fn test_round_trip() {
        let mut config = AppConfig::default();
        config.midi.sources = vec!["launchpad".to_string()];
        config.obs = Some(ObsConfig {
            host: "10.0.0.5".to_string(),
            port: 4456,
            password: Some("secret".to_string()),
        });

        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.midi.sources, vec!["launchpad"]);
        assert_eq!(back.obs.unwrap().port, 4456);
    }
}
