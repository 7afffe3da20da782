//! Command-line interface for hermes-wake
//!
//! Flags override values from the configuration file.

use crate::config::{Config, WakewordConfig};
use crate::defaults;
use crate::error::{Result, WakeError};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Hermes MQTT wake word service using keyphrase spotting
#[derive(Parser, Debug)]
#[command(name = "hermes-wake", version, about = "Hermes MQTT wake word service")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Acoustic model directory
    #[arg(long, value_name = "PATH")]
    pub acoustic_model: Option<PathBuf>,

    /// Pronunciation dictionary
    #[arg(long, value_name = "PATH")]
    pub dictionary: Option<PathBuf>,

    /// Keyphrase to listen for (e.g. "ok computer")
    #[arg(long, value_name = "TEXT")]
    pub keyphrase: Option<String>,

    /// Detection threshold, lower values detect more eagerly [default: 1e-40]
    #[arg(long, value_name = "FLOAT")]
    pub keyphrase_threshold: Option<f64>,

    /// MLLR tuning matrix for the acoustic model
    #[arg(long, value_name = "PATH")]
    pub mllr_matrix: Option<PathBuf>,

    /// Wakeword id used in topics and payloads [default: default]
    #[arg(long = "wakewordId", value_name = "ID")]
    pub wakeword_id: Option<String>,

    /// MQTT host [default: localhost]
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// MQTT port [default: 1883]
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Site to listen on; repeat for several (default: all sites)
    #[arg(long = "siteId", value_name = "ID")]
    pub site_ids: Vec<String>,

    /// Print DEBUG messages, including decoder output
    #[arg(long)]
    pub debug: bool,

    /// Bytes of audio per decoder call [default: 2048]
    #[arg(long, value_name = "BYTES")]
    pub frame_size: Option<usize>,

    /// Wait between reconnect attempts (e.g., 500ms, 5s; bare numbers are seconds)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub reconnect_delay: Option<Duration>,
}

/// Parse a duration: bare number as seconds, or humantime format (e.g. "500ms", "2s").
fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

impl Cli {
    /// Overlay the flags onto `config`.
    ///
    /// `--keyphrase` defines a wakeword together with `--acoustic-model` and
    /// `--dictionary`; it replaces a configured wakeword with the same id.
    pub fn apply(self, mut config: Config) -> Result<Config> {
        if let Some(keyword) = self.keyphrase {
            let model_path = self.acoustic_model.ok_or_else(|| missing("--acoustic-model"))?;
            let dictionary_path = self.dictionary.ok_or_else(|| missing("--dictionary"))?;

            let mut wakeword = WakewordConfig::new(&keyword, model_path, dictionary_path)
                .with_id(self.wakeword_id.as_deref().unwrap_or(defaults::WAKEWORD_ID))
                .with_threshold(self.keyphrase_threshold.unwrap_or(defaults::KEYPHRASE_THRESHOLD));
            if let Some(matrix) = self.mllr_matrix {
                wakeword = wakeword.with_tuning_matrix(matrix);
            }

            config
                .wakewords
                .retain(|w| w.wakeword_id != wakeword.wakeword_id);
            config.wakewords.push(wakeword);
        } else if self.acoustic_model.is_some() || self.dictionary.is_some() {
            return Err(WakeError::ConfigInvalidValue {
                key: "keyphrase".to_string(),
                message: "--keyphrase is required with --acoustic-model and --dictionary"
                    .to_string(),
            });
        }

        if let Some(host) = self.host {
            config.mqtt.host = host;
        }
        if let Some(port) = self.port {
            config.mqtt.port = port;
        }
        if !self.site_ids.is_empty() {
            config.site_ids = self.site_ids;
        }
        if let Some(frame_size) = self.frame_size {
            config.audio.frame_size = frame_size;
        }
        if let Some(delay) = self.reconnect_delay {
            config.mqtt.reconnect_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        }
        config.debug |= self.debug;

        Ok(config)
    }
}

fn missing(flag: &str) -> WakeError {
    WakeError::ConfigInvalidValue {
        key: flag.trim_start_matches('-').to_string(),
        message: format!("{} is required with --keyphrase", flag),
    }
}
