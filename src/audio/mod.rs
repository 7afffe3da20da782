//! Audio payload handling: WAV unwrapping and fixed-size framing.

pub mod frame_buffer;
pub mod wav;

pub use frame_buffer::FrameBuffer;
pub use wav::{decode_payload, encode_wav, pcm_to_samples, samples_to_pcm};
