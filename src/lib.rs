//! hermes-wake - Hermes MQTT wake word service
//!
//! Listens to audio frames on the message bus, spots a keyphrase per site
//! and announces detections with the Hermes protocol.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod decoder;
pub mod defaults;
pub mod error;
pub mod hermes;
pub mod pipeline;
pub mod router;
pub mod service;
pub mod transport;

// Capability traits (decoder in, bus out)
pub use decoder::{DecoderLoader, KeywordDecoder};
pub use transport::{Transport, TransportEvent};

// Core state
pub use audio::FrameBuffer;
pub use decoder::{DecoderHandle, DecoderKey, DecoderManager, DetectionEvent, DetectionResult};
pub use router::{Route, SiteRouter};
pub use service::{WakeService, run_service};

// Error handling
pub use error::{Result, WakeError};

// Config
pub use config::{Config, DisabledAudioPolicy, WakewordConfig};

// Station framework
pub use pipeline::{ErrorReporter, Station, StationError};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
