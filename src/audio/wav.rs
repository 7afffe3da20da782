//! Audio frame payload decoding.
//!
//! Hermes audio servers wrap every frame in a tiny WAV file. Payloads with a
//! RIFF header are unpacked, down-mixed to mono and resampled to the decoder
//! rate. Anything else is taken to be raw 16-bit little-endian PCM already.

use crate::error::{Result, WakeError};
use std::borrow::Cow;
use std::io::Cursor;

/// Returns true if the payload starts with a RIFF/WAVE header.
pub fn is_wav(payload: &[u8]) -> bool {
    payload.len() >= 12 && &payload[0..4] == b"RIFF" && &payload[8..12] == b"WAVE"
}

/// Turn an audio-frame payload into 16-bit LE PCM at `sample_rate`.
///
/// Raw payloads are borrowed unchanged.
pub fn decode_payload(payload: &[u8], sample_rate: u32) -> Result<Cow<'_, [u8]>> {
    if !is_wav(payload) {
        return Ok(Cow::Borrowed(payload));
    }

    let mut wav_reader =
        hound::WavReader::new(Cursor::new(payload)).map_err(|e| WakeError::AudioFormat {
            message: format!("Failed to parse WAV frame: {}", e),
        })?;

    let spec = wav_reader.spec();
    let raw_samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample == 16 => wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let shift = i32::from(spec.bits_per_sample) - 16;
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| scale_int(v, shift)))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
            .collect::<std::result::Result<Vec<_>, _>>(),
    }
    .map_err(|e| WakeError::AudioFormat {
        message: format!("Failed to read WAV samples: {}", e),
    })?;

    let mono_samples = downmix(raw_samples, spec.channels);

    let samples = if spec.sample_rate != sample_rate {
        resample(&mono_samples, spec.sample_rate, sample_rate)
    } else {
        mono_samples
    };

    Ok(Cow::Owned(samples_to_pcm(&samples)))
}

/// Encode mono 16-bit samples as a WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let to_error = |e: hound::Error| WakeError::AudioFormat {
        message: format!("Failed to write WAV frame: {}", e),
    };

    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(to_error)?;
    for &s in samples {
        writer.write_sample(s).map_err(to_error)?;
    }
    writer.finalize().map_err(to_error)?;

    Ok(cursor.into_inner())
}

/// Interpret little-endian bytes as 16-bit samples. A trailing odd byte is ignored.
pub fn pcm_to_samples(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Serialize samples as little-endian bytes.
pub fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn scale_int(value: i32, shift: i32) -> i16 {
    if shift >= 0 {
        (value >> shift) as i16
    } else {
        (value << -shift) as i16
    }
}

fn downmix(samples: Vec<i16>, channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples;
    }
    let channels = usize::from(channels);
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
