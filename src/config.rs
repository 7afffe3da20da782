use crate::defaults;
use crate::error::{Result, WakeError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Sites this service is authoritative for. Empty means every site.
    pub site_ids: Vec<String>,
    /// Enable verbose decoder logging
    pub debug: bool,
    pub mqtt: MqttConfig,
    pub audio: AudioConfig,
    #[serde(rename = "wakeword")]
    pub wakewords: Vec<WakewordConfig>,
}

/// Message bus connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_delay_ms: u64,
}

/// Audio framing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Bytes handed to the decoder per call
    pub frame_size: usize,
    /// Decoder sample rate; WAV payloads are resampled to it
    pub sample_rate: u32,
    /// Chunks larger than this are dropped
    pub max_chunk_bytes: usize,
    /// Frames queued per decoder worker
    pub queue_capacity: usize,
    pub on_disable: DisabledAudioPolicy,
}

/// What happens to a site's partial frame when detection is toggled off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisabledAudioPolicy {
    /// Keep the partial frame; frames completed while disabled are discarded.
    #[default]
    KeepPartial,
    /// Drop the partial frame at toggle-off.
    ResetBuffer,
}

/// One keyphrase and the model files used to spot it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WakewordConfig {
    #[serde(rename = "id", default = "default_wakeword_id")]
    pub wakeword_id: String,
    #[serde(alias = "keyphrase")]
    pub keyword: String,
    #[serde(alias = "acoustic_model")]
    pub model_path: PathBuf,
    #[serde(alias = "dictionary")]
    pub dictionary_path: PathBuf,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(alias = "mllr_matrix", default)]
    pub tuning_matrix: Option<PathBuf>,
}

fn default_wakeword_id() -> String {
    defaults::WAKEWORD_ID.to_string()
}

fn default_threshold() -> f64 {
    defaults::KEYPHRASE_THRESHOLD
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: defaults::MQTT_HOST.to_string(),
            port: defaults::MQTT_PORT,
            client_id: None,
            keep_alive_secs: defaults::MQTT_KEEP_ALIVE_SECS,
            reconnect_delay_ms: defaults::RECONNECT_DELAY_MS,
        }
    }
}

impl MqttConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_size: defaults::FRAME_SIZE_BYTES,
            sample_rate: defaults::SAMPLE_RATE,
            max_chunk_bytes: defaults::MAX_CHUNK_BYTES,
            queue_capacity: defaults::DECODER_QUEUE_CAPACITY,
            on_disable: DisabledAudioPolicy::default(),
        }
    }
}

impl WakewordConfig {
    /// Creates a wakeword with the default id and threshold.
    pub fn new(keyword: &str, model_path: PathBuf, dictionary_path: PathBuf) -> Self {
        Self {
            wakeword_id: default_wakeword_id(),
            keyword: keyword.to_string(),
            model_path,
            dictionary_path,
            threshold: defaults::KEYPHRASE_THRESHOLD,
            tuning_matrix: None,
        }
    }

    pub fn with_id(mut self, wakeword_id: &str) -> Self {
        self.wakeword_id = wakeword_id.to_string();
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_tuning_matrix(mut self, path: PathBuf) -> Self {
        self.tuning_matrix = Some(path);
        self
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WakeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                WakeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(WakeError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - HERMES_WAKE_MQTT_HOST → mqtt.host
    /// - HERMES_WAKE_MQTT_PORT → mqtt.port
    /// - HERMES_WAKE_SITE_IDS → site_ids (comma separated)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("HERMES_WAKE_MQTT_HOST")
            && !host.is_empty()
        {
            self.mqtt.host = host;
        }

        if let Ok(port) = std::env::var("HERMES_WAKE_MQTT_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.mqtt.port = port;
        }

        if let Ok(sites) = std::env::var("HERMES_WAKE_SITE_IDS")
            && !sites.is_empty()
        {
            self.site_ids = sites
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        self
    }

    /// Check the values a running service depends on.
    pub fn validate(&self) -> Result<()> {
        if self.wakewords.is_empty() {
            return Err(invalid("wakeword", "at least one wakeword is required"));
        }

        let mut seen = HashSet::new();
        for wakeword in &self.wakewords {
            if wakeword.wakeword_id.is_empty() {
                return Err(invalid("wakeword.id", "must not be empty"));
            }
            if !seen.insert(wakeword.wakeword_id.as_str()) {
                return Err(invalid(
                    "wakeword.id",
                    &format!("duplicate id '{}'", wakeword.wakeword_id),
                ));
            }
            if wakeword.keyword.trim().is_empty() {
                return Err(invalid("wakeword.keyword", "must not be empty"));
            }
            if !(wakeword.threshold.is_finite() && wakeword.threshold > 0.0) {
                return Err(invalid("wakeword.threshold", "must be a positive number"));
            }
        }

        if self.audio.frame_size == 0 || self.audio.frame_size % 2 != 0 {
            return Err(invalid(
                "audio.frame_size",
                "must be a positive, even number of bytes",
            ));
        }
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.max_chunk_bytes == 0 {
            return Err(invalid("audio.max_chunk_bytes", "must be positive"));
        }
        if self.audio.queue_capacity == 0 {
            return Err(invalid("audio.queue_capacity", "must be positive"));
        }
        if self.site_ids.iter().any(|s| s.is_empty() || s.contains(['+', '#', '/'])) {
            return Err(invalid(
                "site_ids",
                "site ids must be non-empty and free of MQTT wildcards",
            ));
        }

        Ok(())
    }

    /// Client id used for the broker session.
    ///
    /// Stable across restarts so the broker can resume the persistent session.
    pub fn client_id(&self) -> String {
        if let Some(id) = &self.mqtt.client_id {
            return id.clone();
        }
        let wakewords: Vec<&str> = self
            .wakewords
            .iter()
            .map(|w| w.wakeword_id.as_str())
            .collect();
        let sites = if self.site_ids.is_empty() {
            "all".to_string()
        } else {
            self.site_ids.join("-")
        };
        format!("hermes-wake-{}-{}", wakewords.join("-"), sites)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/hermes-wake/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hermes-wake").join("config.toml"))
    }
}

fn invalid(key: &str, message: &str) -> WakeError {
    WakeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
