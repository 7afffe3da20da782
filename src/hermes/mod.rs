//! Hermes protocol: topics and JSON payloads.

pub mod messages;
pub mod topics;

pub use messages::{
    AsrStartListening, GetHotwords, HotwordDetected, HotwordError, HotwordModel, HotwordToggle,
    Hotwords, InboundMessage, OutboundMessage, ReloadRequest,
};
