use crate::config::WakewordConfig;
use crate::error::{Result, WakeError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A streaming keyphrase spotter.
///
/// This trait allows swapping implementations (pocketsphinx vs mock).
pub trait KeywordDecoder: Send {
    /// Feed one frame of 16-bit PCM at 16kHz mono.
    ///
    /// Returns true when the keyphrase has been heard.
    fn process(&mut self, frame: &[i16]) -> Result<bool>;

    /// Drop any partial utterance and start listening afresh.
    fn reset(&mut self) -> Result<()>;

    /// Confidence of the most recent detection, if the engine reports one.
    fn confidence(&self) -> Option<f32> {
        None
    }
}

/// Builds decoders from wakeword configuration.
pub trait DecoderLoader: Send + Sync {
    fn load(&self, config: &WakewordConfig) -> Result<Box<dyn KeywordDecoder>>;
}

/// Implement DecoderLoader for Arc<T> to allow sharing across workers.
impl<T: DecoderLoader> DecoderLoader for Arc<T> {
    fn load(&self, config: &WakewordConfig) -> Result<Box<dyn KeywordDecoder>> {
        (**self).load(config)
    }
}

/// Amplitude above which [`MockDecoder`] reports a detection.
pub const MOCK_TRIGGER_LEVEL: i16 = 10_000;

/// Mock decoder for testing
///
/// Fires on any frame whose mean absolute amplitude reaches the trigger
/// level, so loud fixture audio stands in for the spoken keyphrase.
#[derive(Debug, Clone)]
pub struct MockDecoder {
    trigger_level: i16,
    last_confidence: Option<f32>,
    frames: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self {
            trigger_level: MOCK_TRIGGER_LEVEL,
            last_confidence: None,
            frames: Arc::new(AtomicUsize::new(0)),
            resets: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_trigger_level(mut self, level: i16) -> Self {
        self.trigger_level = level;
        self
    }

    /// Number of frames processed (shared between clones).
    pub fn frames_processed(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    /// Number of resets (shared between clones).
    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordDecoder for MockDecoder {
    fn process(&mut self, frame: &[i16]) -> Result<bool> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        if frame.is_empty() {
            return Ok(false);
        }
        let mean = frame.iter().map(|&s| i64::from(s).abs()).sum::<i64>() / frame.len() as i64;
        if mean >= i64::from(self.trigger_level) {
            self.last_confidence = Some((mean as f32 / f32::from(i16::MAX)).min(1.0));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn reset(&mut self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn confidence(&self) -> Option<f32> {
        self.last_confidence
    }
}

/// Mock loader for testing
///
/// Hands out [`MockDecoder`]s and can be told to fail for specific
/// wakeword ids, or for everything, to exercise load and reload errors.
#[derive(Debug, Default)]
pub struct MockLoader {
    failing: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    loads: AtomicUsize,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every load of the given wakeword id.
    pub fn failing_for(self, wakeword_id: &str) -> Self {
        self.set_failing(wakeword_id, true);
        self
    }

    pub fn set_failing(&self, wakeword_id: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing {
            set.insert(wakeword_id.to_string());
        } else {
            set.remove(wakeword_id);
        }
    }

    pub fn set_fail_all(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Number of successful loads.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl DecoderLoader for MockLoader {
    fn load(&self, config: &WakewordConfig) -> Result<Box<dyn KeywordDecoder>> {
        let failing = self.fail_all.load(Ordering::SeqCst)
            || self
                .failing
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains(&config.wakeword_id);
        if failing {
            return Err(WakeError::ModelLoad {
                wakeword_id: config.wakeword_id.clone(),
                message: format!("mock model {} unavailable", config.model_path.display()),
            });
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockDecoder::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn wakeword(id: &str) -> WakewordConfig {
        WakewordConfig::new("ok computer", PathBuf::from("/m"), PathBuf::from("/d")).with_id(id)
    }

    #[test]
    fn test_mock_decoder_fires_on_loud_frames() {
        let mut decoder = MockDecoder::new();
        assert!(!decoder.process(&[0i16; 160]).unwrap());
        assert_eq!(decoder.confidence(), None);

        assert!(decoder.process(&[20_000i16; 160]).unwrap());
        let confidence = decoder.confidence().unwrap();
        assert!(confidence > 0.5 && confidence <= 1.0);
        assert_eq!(decoder.frames_processed(), 2);
    }

    #[test]
    fn test_mock_decoder_counts_resets_across_clones() {
        let decoder = MockDecoder::new();
        let mut clone = decoder.clone();
        clone.reset().unwrap();
        assert_eq!(decoder.resets(), 1);
    }

    #[test]
    fn test_mock_decoder_custom_trigger_level() {
        let mut decoder = MockDecoder::new().with_trigger_level(100);
        assert!(decoder.process(&[-150i16; 10]).unwrap());
        assert!(!decoder.process(&[]).unwrap());
    }

    #[test]
    fn test_mock_loader_loads_and_counts() {
        let loader = MockLoader::new();
        assert!(loader.load(&wakeword("default")).is_ok());
        assert_eq!(loader.loads(), 1);
    }

    #[test]
    fn test_mock_loader_failure_is_model_load_error() {
        let loader = MockLoader::new().failing_for("broken");
        match loader.load(&wakeword("broken")) {
            Err(WakeError::ModelLoad { wakeword_id, .. }) => assert_eq!(wakeword_id, "broken"),
            _ => panic!("Expected ModelLoad error"),
        }
        assert!(loader.load(&wakeword("default")).is_ok());

        loader.set_failing("broken", false);
        assert!(loader.load(&wakeword("broken")).is_ok());

        loader.set_fail_all(true);
        assert!(loader.load(&wakeword("default")).is_err());
    }

    #[test]
    fn test_loader_through_arc() {
        let loader = Arc::new(MockLoader::new());
        let wrapped = Arc::new(Arc::clone(&loader));
        let shared: Arc<dyn DecoderLoader> = wrapped;
        shared.load(&wakeword("default")).unwrap();
        assert_eq!(loader.loads(), 1);
    }
}
