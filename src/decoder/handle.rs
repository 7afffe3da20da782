//! One decoder bound to one (site, wakeword) pair.

use crate::config::WakewordConfig;
use crate::decoder::engine::{DecoderLoader, KeywordDecoder};
use crate::error::{Result, WakeError};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Composite key of the decoder table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderKey {
    pub site_id: String,
    pub wakeword_id: String,
}

impl DecoderKey {
    pub fn new(site_id: &str, wakeword_id: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            wakeword_id: wakeword_id.to_string(),
        }
    }
}

impl fmt::Display for DecoderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.site_id, self.wakeword_id)
    }
}

/// Lifecycle of a decoder handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No decoder loaded (never loaded, or the load failed).
    Unloaded,
    /// Loaded and able to signal a detection.
    Listening,
    /// Just signalled a detection; the rest of that utterance is ignored.
    Reset,
}

/// Outcome of feeding one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionResult {
    None,
    Detected { confidence: Option<f32> },
}

impl DetectionResult {
    pub fn is_detected(&self) -> bool {
        matches!(self, DetectionResult::Detected { .. })
    }
}

/// Exclusive owner of a decoder instance.
///
/// Not `Sync`: a handle is driven by exactly one worker, which rules out
/// concurrent `process` calls on the same decoder.
pub struct DecoderHandle {
    key: DecoderKey,
    config: Arc<WakewordConfig>,
    loader: Arc<dyn DecoderLoader>,
    decoder: Option<Box<dyn KeywordDecoder>>,
    state: DecoderState,
    generation: u64,
}

impl DecoderHandle {
    /// Creates an unloaded handle.
    pub fn new(key: DecoderKey, config: Arc<WakewordConfig>, loader: Arc<dyn DecoderLoader>) -> Self {
        Self {
            key,
            config,
            loader,
            decoder: None,
            state: DecoderState::Unloaded,
            generation: 0,
        }
    }

    /// Creates a handle around an already loaded decoder.
    pub fn with_decoder(
        key: DecoderKey,
        config: Arc<WakewordConfig>,
        loader: Arc<dyn DecoderLoader>,
        decoder: Box<dyn KeywordDecoder>,
    ) -> Self {
        Self {
            decoder: Some(decoder),
            state: DecoderState::Listening,
            generation: 1,
            ..Self::new(key, config, loader)
        }
    }

    pub fn key(&self) -> &DecoderKey {
        &self.key
    }

    pub fn config(&self) -> &WakewordConfig {
        &self.config
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// How many decoder instances this handle has had; bumps on every load.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Loads the decoder if the handle is unloaded. A no-op otherwise.
    pub fn load(&mut self) -> Result<()> {
        if self.decoder.is_some() {
            return Ok(());
        }
        self.install(self.loader.load(&self.config)?);
        Ok(())
    }

    /// Replaces the decoder with a freshly loaded one.
    ///
    /// The old decoder keeps serving if the new load fails.
    pub fn reload(&mut self) -> Result<()> {
        let fresh = self.loader.load(&self.config)?;
        self.install(fresh);
        Ok(())
    }

    /// Feeds one frame.
    ///
    /// A detection resets the underlying decoder and moves the handle to
    /// [`DecoderState::Reset`] before returning. Positive frames that
    /// follow in the same contiguous utterance are swallowed; the first
    /// negative frame or an explicit [`reset`](Self::reset) re-arms it.
    pub fn process(&mut self, frame: &[i16]) -> Result<DetectionResult> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Err(WakeError::DecoderNotReady {
                site_id: self.key.site_id.clone(),
                wakeword_id: self.key.wakeword_id.clone(),
            });
        };

        let heard = decoder.process(frame)?;
        match (self.state, heard) {
            (DecoderState::Listening, true) => {
                let confidence = decoder.confidence();
                decoder.reset()?;
                self.state = DecoderState::Reset;
                Ok(DetectionResult::Detected { confidence })
            }
            (DecoderState::Reset, true) => {
                debug!(pair = %self.key, "Keyphrase still active after detection, ignoring");
                decoder.reset()?;
                Ok(DetectionResult::None)
            }
            (DecoderState::Reset, false) => {
                self.state = DecoderState::Listening;
                Ok(DetectionResult::None)
            }
            _ => Ok(DetectionResult::None),
        }
    }

    /// Drops any partial utterance and re-arms detection.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset()?;
            self.state = DecoderState::Listening;
        }
        Ok(())
    }

    /// Releases the decoder, returning the handle to `Unloaded`.
    pub fn unload(&mut self) {
        self.decoder = None;
        self.state = DecoderState::Unloaded;
    }

    fn install(&mut self, decoder: Box<dyn KeywordDecoder>) {
        self.decoder = Some(decoder);
        self.state = DecoderState::Listening;
        self.generation += 1;
    }
}
