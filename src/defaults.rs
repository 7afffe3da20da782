//! Default configuration constants for hermes-wake.
//!
//! Shared between the config file, the CLI and the test fixtures so that the
//! values only live in one place.

/// Sample rate the keyphrase decoder expects, in Hz.
///
/// Hermes audio servers publish 16kHz 16-bit mono frames; WAV payloads at
/// other rates are resampled to this before framing.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per decoder frame (1024 samples of 16-bit PCM, 64ms at 16kHz).
pub const FRAME_SIZE_BYTES: usize = 2048;

/// Largest single audio chunk accepted from the bus.
///
/// One mebibyte is about 32 seconds of audio. Anything larger is not an
/// audio frame and is dropped instead of flooding the decoders.
pub const MAX_CHUNK_BYTES: usize = 1024 * 1024;

/// Frames queued per decoder worker before new frames are dropped.
pub const DECODER_QUEUE_CAPACITY: usize = 256;

/// Default keyphrase detection threshold (pocketsphinx `-kws_threshold`).
pub const KEYPHRASE_THRESHOLD: f64 = 1e-40;

/// Wakeword id used when none is configured.
pub const WAKEWORD_ID: &str = "default";

/// MQTT broker host.
pub const MQTT_HOST: &str = "localhost";

/// MQTT broker port.
pub const MQTT_PORT: u16 = 1883;

/// MQTT keep-alive interval in seconds.
pub const MQTT_KEEP_ALIVE_SECS: u64 = 30;

/// Delay before polling the broker again after a dropped connection.
pub const RECONNECT_DELAY_MS: u64 = 5000;

/// Capacity of the MQTT client request queue.
pub const MQTT_REQUEST_CAPACITY: usize = 128;

/// Model type reported in detection payloads.
pub const MODEL_TYPE: &str = "personal";

/// Outbound messages held while the broker is unreachable.
///
/// Oldest messages are dropped first once the backlog is full.
pub const PENDING_PUBLISH_CAPACITY: usize = 256;
