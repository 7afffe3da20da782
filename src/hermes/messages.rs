//! JSON payloads exchanged over the message bus.

use crate::error::{Result, WakeError};
use crate::hermes::topics;
use serde::{Deserialize, Serialize};

/// `hermes/hotword/toggleOn` and `toggleOff`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotwordToggle {
    /// Absent means every site
    pub site_id: Option<String>,
    /// Who asked, e.g. `dialogueSession`; toggles are tracked per reason
    pub reason: Option<String>,
    /// Absent means every wakeword
    pub wakeword_id: Option<String>,
}

/// `rhasspy/hotword/reload`; an empty payload reloads everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReloadRequest {
    pub wakeword_id: Option<String>,
    pub site_id: Option<String>,
}

/// `rhasspy/hotword/getHotwords`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetHotwords {
    #[serde(default = "default_site")]
    pub site_id: String,
    #[serde(default)]
    pub id: Option<String>,
}

fn default_site() -> String {
    "default".to_string()
}

/// A message this service consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    AudioFrame { site_id: String, payload: Vec<u8> },
    ToggleOn(HotwordToggle),
    ToggleOff(HotwordToggle),
    Reload(ReloadRequest),
    GetHotwords(GetHotwords),
}

impl InboundMessage {
    /// Interprets a bus message. Returns `Ok(None)` for topics this service
    /// does not handle.
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Option<Self>> {
        if let Some(site_id) = topics::audio_frame_site(topic) {
            return Ok(Some(InboundMessage::AudioFrame {
                site_id: site_id.to_string(),
                payload: payload.to_vec(),
            }));
        }

        let message = match topic {
            topics::TOGGLE_ON => InboundMessage::ToggleOn(from_payload(topic, payload)?),
            topics::TOGGLE_OFF => InboundMessage::ToggleOff(from_payload(topic, payload)?),
            topics::RELOAD => InboundMessage::Reload(from_payload(topic, payload)?),
            topics::GET_HOTWORDS => InboundMessage::GetHotwords(from_payload(topic, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// The site the message names, if any.
    pub fn site_id(&self) -> Option<&str> {
        match self {
            InboundMessage::AudioFrame { site_id, .. } => Some(site_id),
            InboundMessage::ToggleOn(toggle) | InboundMessage::ToggleOff(toggle) => {
                toggle.site_id.as_deref()
            }
            InboundMessage::Reload(request) => request.site_id.as_deref(),
            InboundMessage::GetHotwords(request) => Some(&request.site_id),
        }
    }
}

/// Decodes a JSON payload; an empty payload yields `T::default()` when the
/// type allows it.
fn from_payload<T: for<'de> Deserialize<'de>>(topic: &str, payload: &[u8]) -> Result<T> {
    let payload = if payload.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        payload
    };
    serde_json::from_slice(payload).map_err(|e| WakeError::Protocol {
        topic: topic.to_string(),
        message: e.to_string(),
    })
}

/// `hermes/hotword/<wakewordId>/detected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotwordDetected {
    pub site_id: String,
    pub wakeword_id: String,
    pub model_id: String,
    pub model_version: String,
    pub model_type: String,
    pub current_sensitivity: f64,
    pub session_id: Option<String>,
    pub send_audio_captured: Option<bool>,
}

/// `hermes/asr/startListening`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsrStartListening {
    pub site_id: String,
    pub session_id: Option<String>,
    pub wakeword_id: Option<String>,
    pub stop_on_silence: bool,
    pub send_audio_captured: bool,
}

/// `hermes/error/hotword`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotwordError {
    pub error: String,
    pub context: Option<String>,
    pub site_id: String,
}

/// One entry of a hotword listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotwordModel {
    pub model_id: String,
    pub words: String,
    pub model_version: String,
    pub model_type: String,
}

/// `rhasspy/hotword/hotwords`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hotwords {
    pub models: Vec<HotwordModel>,
    pub id: Option<String>,
    pub site_id: String,
}

/// A message this service publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Detected(HotwordDetected),
    StartListening(AsrStartListening),
    Error(HotwordError),
    Hotwords(Hotwords),
}

impl OutboundMessage {
    pub fn topic(&self) -> String {
        match self {
            OutboundMessage::Detected(detected) => topics::detected(&detected.wakeword_id),
            OutboundMessage::StartListening(_) => topics::START_LISTENING.to_string(),
            OutboundMessage::Error(_) => topics::HOTWORD_ERROR.to_string(),
            OutboundMessage::Hotwords(_) => topics::HOTWORDS.to_string(),
        }
    }

    /// Serialize the payload to JSON bytes.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            OutboundMessage::Detected(m) => serde_json::to_vec(m)?,
            OutboundMessage::StartListening(m) => serde_json::to_vec(m)?,
            OutboundMessage::Error(m) => serde_json::to_vec(m)?,
            OutboundMessage::Hotwords(m) => serde_json::to_vec(m)?,
        };
        Ok(bytes)
    }

    pub fn site_id(&self) -> &str {
        match self {
            OutboundMessage::Detected(m) => &m.site_id,
            OutboundMessage::StartListening(m) => &m.site_id,
            OutboundMessage::Error(m) => &m.site_id,
            OutboundMessage::Hotwords(m) => &m.site_id,
        }
    }
}
