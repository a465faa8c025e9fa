//! Configuration management for MIDI Thru
//!
//! Handles loading, parsing and validation of the YAML configuration file.

use crate::engine::{ChannelFilter, ChannelSet, EngineOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// MIDI backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Client name registered with the system MIDI API
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Ask for sysex-capable access before falling back to baseline
    #[serde(default = "default_true")]
    pub request_sysex: bool,
    /// Upper bound for one access request (null disables the timeout)
    #[serde(default = "default_access_timeout_ms")]
    pub access_timeout_ms: Option<u64>,
    /// Delay before the first `start()`, lets backends settle
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Port list polling interval for hot-plug detection
    #[serde(default = "default_hotplug_poll_ms")]
    pub hotplug_poll_ms: u64,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            request_sysex: true,
            access_timeout_ms: default_access_timeout_ms(),
            startup_delay_ms: default_startup_delay_ms(),
            hotplug_poll_ms: default_hotplug_poll_ms(),
        }
    }
}

/// Initial mute/solo state
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelsConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub muted: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soloed: Vec<u8>,
}

/// Preference store location
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StateConfig {
    /// Override for the sled database directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
}

fn default_client_name() -> String {
    "midi-thru".to_string()
}

fn default_true() -> bool {
    true
}

fn default_access_timeout_ms() -> Option<u64> {
    Some(3000)
}

fn default_startup_delay_ms() -> u64 {
    500
}

fn default_hotplug_poll_ms() -> u64 {
    1000
}

impl AppConfig {
    /// Load configuration from file with validation.
    ///
    /// A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("midi.client_name cannot be empty");
        }
        if self.midi.hotplug_poll_ms == 0 {
            anyhow::bail!("midi.hotplug_poll_ms must be greater than 0");
        }
        if self.midi.access_timeout_ms == Some(0) {
            anyhow::bail!("midi.access_timeout_ms must be greater than 0 (or null to disable)");
        }

        for (section, channels) in [
            ("muted", &self.channels.muted),
            ("soloed", &self.channels.soloed),
        ] {
            if let Some(bad) = channels.iter().find(|c| !ChannelSet::is_valid(**c)) {
                anyhow::bail!("channels.{} contains invalid channel {} (must be 1-16)", section, bad);
            }
        }

        Ok(())
    }

    /// Engine tuning derived from the `midi` and `channels` sections
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            request_extended: self.midi.request_sysex,
            access_timeout: self.midi.access_timeout_ms.map(Duration::from_millis),
            initial_filter: ChannelFilter::new(
                self.channels.muted.iter().copied().collect(),
                self.channels.soloed.iter().copied().collect(),
            ),
        }
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.midi.startup_delay_ms)
    }

    pub fn hotplug_poll_interval(&self) -> Duration {
        Duration::from_millis(self.midi.hotplug_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.midi.client_name, "midi-thru");
        assert!(config.midi.request_sysex);
        assert_eq!(config.midi.access_timeout_ms, Some(3000));
        assert_eq!(config.midi.startup_delay_ms, 500);
        assert_eq!(config.midi.hotplug_poll_ms, 1000);
        assert!(config.channels.muted.is_empty());
        assert!(config.state.db_path.is_none());
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
midi:
  client_name: "studio-thru"
  request_sysex: false
  access_timeout_ms: null
  startup_delay_ms: 0
  hotplug_poll_ms: 250
channels:
  muted: [1, 2]
  soloed: [10]
state:
  db_path: /tmp/midi-thru-prefs
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.midi.client_name, "studio-thru");
        assert_eq!(config.midi.access_timeout_ms, None);
        assert_eq!(config.hotplug_poll_interval(), Duration::from_millis(250));

        let options = config.engine_options();
        assert!(!options.request_extended);
        assert!(options.access_timeout.is_none());
        assert!(options.initial_filter.muted.contains(2));
        assert!(options.initial_filter.is_channel_active(10));
        assert!(!options.initial_filter.is_channel_active(3));
        assert_eq!(
            config.state.db_path.as_deref(),
            Some(Path::new("/tmp/midi-thru-prefs"))
        );
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let err = AppConfig::from_yaml("channels:\n  muted: [0, 5]\n").unwrap_err();
        assert!(format!("{:#}", err).contains("invalid channel 0"));

        assert!(AppConfig::from_yaml("channels:\n  soloed: [17]\n").is_err());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        assert!(AppConfig::from_yaml("midi:\n  hotplug_poll_ms: 0\n").is_err());
        assert!(AppConfig::from_yaml("midi:\n  access_timeout_ms: 0\n").is_err());
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        assert!(AppConfig::from_yaml("midi: [unterminated").is_err());
    }

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config.midi.client_name, "midi-thru");
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = AppConfig::default();
        config.midi.client_name = "saved".to_string();
        config.channels.soloed = vec![3];
        config.save(&path).await.unwrap();

        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded.midi.client_name, "saved");
        assert_eq!(loaded.channels.soloed, vec![3]);
    }
}
