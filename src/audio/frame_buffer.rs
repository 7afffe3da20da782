//! Per-site framing of audio chunks into decoder-sized frames.
//!
//! Audio arrives from the bus in whatever chunk sizes the audio server
//! chooses. The decoder wants fixed frames. Each site keeps at most one
//! partial frame between pushes.

use crate::defaults;
use crate::error::{Result, WakeError};
use std::collections::HashMap;

/// Accumulates raw PCM bytes per site and hands out whole frames.
#[derive(Debug)]
pub struct FrameBuffer {
    frame_size: usize,
    max_chunk_bytes: usize,
    pending: HashMap<String, Vec<u8>>,
}

impl FrameBuffer {
    /// Creates a buffer emitting frames of `frame_size` bytes.
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be positive");
        Self {
            frame_size,
            max_chunk_bytes: defaults::MAX_CHUNK_BYTES,
            pending: HashMap::new(),
        }
    }

    /// Rejects chunks larger than `max_chunk_bytes`.
    pub fn with_max_chunk_bytes(mut self, max_chunk_bytes: usize) -> Self {
        self.max_chunk_bytes = max_chunk_bytes;
        self
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Appends `bytes` to the site's buffer and returns every complete frame, in order.
    ///
    /// An oversized chunk is rejected whole; the site's partial frame is untouched.
    pub fn push(&mut self, site_id: &str, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        if bytes.len() > self.max_chunk_bytes {
            return Err(WakeError::BufferOverrun {
                size: bytes.len(),
                limit: self.max_chunk_bytes,
            });
        }

        let frame_size = self.frame_size;
        let pending = self
            .pending
            .entry(site_id.to_string())
            .or_insert_with(|| Vec::with_capacity(frame_size));
        pending.extend_from_slice(bytes);

        let complete = pending.len() - pending.len() % frame_size;
        if complete == 0 {
            return Ok(Vec::new());
        }

        let frames = pending[..complete]
            .chunks_exact(frame_size)
            .map(<[u8]>::to_vec)
            .collect();
        pending.drain(..complete);

        Ok(frames)
    }

    /// Bytes currently held back for the site (always less than one frame).
    pub fn pending_len(&self, site_id: &str) -> usize {
        self.pending.get(site_id).map_or(0, Vec::len)
    }

    /// Drops the site's partial frame, returning how many bytes were discarded.
    pub fn discard(&mut self, site_id: &str) -> usize {
        self.pending
            .get_mut(site_id)
            .map_or(0, |pending| std::mem::take(pending).len())
    }

    /// Sites that have pushed audio at least once.
    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }
}
