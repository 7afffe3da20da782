//! Hermes and Rhasspy topic names.

pub const AUDIO_FRAME_PREFIX: &str = "hermes/audioServer/";
pub const AUDIO_FRAME_SUFFIX: &str = "/audioFrame";
pub const AUDIO_FRAME_WILDCARD: &str = "hermes/audioServer/+/audioFrame";

pub const TOGGLE_ON: &str = "hermes/hotword/toggleOn";
pub const TOGGLE_OFF: &str = "hermes/hotword/toggleOff";
pub const RELOAD: &str = "rhasspy/hotword/reload";
pub const GET_HOTWORDS: &str = "rhasspy/hotword/getHotwords";

pub const HOTWORDS: &str = "rhasspy/hotword/hotwords";
pub const START_LISTENING: &str = "hermes/asr/startListening";
pub const HOTWORD_ERROR: &str = "hermes/error/hotword";

/// `hermes/audioServer/<site>/audioFrame`
pub fn audio_frame(site_id: &str) -> String {
    format!("{}{}{}", AUDIO_FRAME_PREFIX, site_id, AUDIO_FRAME_SUFFIX)
}

/// Site id of an audio frame topic, or `None` for any other topic.
pub fn audio_frame_site(topic: &str) -> Option<&str> {
    let site_id = topic
        .strip_prefix(AUDIO_FRAME_PREFIX)?
        .strip_suffix(AUDIO_FRAME_SUFFIX)?;
    (!site_id.is_empty() && !site_id.contains('/')).then_some(site_id)
}

/// `hermes/hotword/<wakeword>/detected`
pub fn detected(wakeword_id: &str) -> String {
    format!("hermes/hotword/{}/detected", wakeword_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_frame_topic_roundtrip() {
        let topic = audio_frame("alice");
        assert_eq!(topic, "hermes/audioServer/alice/audioFrame");
        assert_eq!(audio_frame_site(&topic), Some("alice"));
    }

    #[test]
    fn test_audio_frame_site_rejects_other_topics() {
        assert_eq!(audio_frame_site("hermes/audioServer//audioFrame"), None);
        assert_eq!(audio_frame_site("hermes/audioServer/a/b/audioFrame"), None);
        assert_eq!(audio_frame_site("hermes/audioServer/alice/playBytes/1"), None);
        assert_eq!(audio_frame_site(TOGGLE_ON), None);
    }

    #[test]
    fn test_detected_topic() {
        assert_eq!(detected("default"), "hermes/hotword/default/detected");
    }
}
