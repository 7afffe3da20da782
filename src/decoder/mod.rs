//! Keyphrase decoders and the per-(site, wakeword) decoder table.

pub mod engine;
pub mod handle;
pub mod manager;
#[cfg(feature = "pocketsphinx")]
pub mod sphinx;

pub use engine::{DecoderLoader, KeywordDecoder, MockDecoder, MockLoader};
pub use handle::{DecoderHandle, DecoderKey, DecoderState, DetectionResult};
pub use manager::{DecoderCommand, DecoderManager, DecoderOutput, DetectionEvent};
#[cfg(feature = "pocketsphinx")]
pub use sphinx::SphinxLoader;
