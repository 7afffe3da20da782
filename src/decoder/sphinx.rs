//! Pocketsphinx keyphrase spotting backend.

use crate::config::WakewordConfig;
use crate::decoder::engine::{DecoderLoader, KeywordDecoder};
use crate::error::{Result, WakeError};
use pocketsphinx::{CmdLn, PsDecoder};
use tracing::{debug, warn};

/// Loads pocketsphinx decoders in keyphrase search mode.
#[derive(Debug, Clone, Default)]
pub struct SphinxLoader {
    /// Keep pocketsphinx's own logging instead of sending it to /dev/null
    pub debug: bool,
}

impl SphinxLoader {
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn arguments(&self, config: &WakewordConfig) -> Vec<String> {
        let mut args = vec![
            "hermes-wake".to_string(),
            "-hmm".to_string(),
            config.model_path.display().to_string(),
            "-dict".to_string(),
            config.dictionary_path.display().to_string(),
            "-keyphrase".to_string(),
            config.keyword.clone(),
            "-kws_threshold".to_string(),
            format!("{:e}", config.threshold),
        ];

        if let Some(matrix) = &config.tuning_matrix {
            if matrix.is_file() {
                args.push("-mllr".to_string());
                args.push(matrix.display().to_string());
            } else {
                warn!(path = %matrix.display(), "MLLR matrix not found, continuing without it");
            }
        }

        if !self.debug {
            args.push("-logfn".to_string());
            args.push("/dev/null".to_string());
        }

        args
    }
}

impl DecoderLoader for SphinxLoader {
    fn load(&self, config: &WakewordConfig) -> Result<Box<dyn KeywordDecoder>> {
        let model_error = |message: String| WakeError::ModelLoad {
            wakeword_id: config.wakeword_id.clone(),
            message,
        };

        if !config.model_path.is_dir() {
            return Err(model_error(format!(
                "acoustic model directory {} not found",
                config.model_path.display()
            )));
        }
        if !config.dictionary_path.is_file() {
            return Err(model_error(format!(
                "dictionary {} not found",
                config.dictionary_path.display()
            )));
        }

        let args = self.arguments(config);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!(wakeword = %config.wakeword_id, ?arg_refs, "Loading pocketsphinx decoder");

        let cmd_ln =
            CmdLn::init(true, &arg_refs).map_err(|e| model_error(format!("{:?}", e)))?;
        let decoder = PsDecoder::init(cmd_ln);
        decoder
            .start_utt(None)
            .map_err(|e| model_error(format!("failed to start utterance: {:?}", e)))?;

        Ok(Box::new(SphinxDecoder { decoder }))
    }
}

/// A pocketsphinx decoder with an open utterance.
pub struct SphinxDecoder {
    decoder: PsDecoder,
}

// SAFETY: a pocketsphinx decoder has no thread affinity. Each SphinxDecoder is
// owned by a single DecoderHandle whose worker is the only caller.
unsafe impl Send for SphinxDecoder {}

impl KeywordDecoder for SphinxDecoder {
    fn process(&mut self, frame: &[i16]) -> Result<bool> {
        self.decoder
            .process_raw(frame, false, false)
            .map_err(|e| WakeError::Decoder {
                message: format!("process_raw failed: {:?}", e),
            })?;
        Ok(self.decoder.get_hyp().is_some())
    }

    fn reset(&mut self) -> Result<()> {
        self.decoder.end_utt().map_err(|e| WakeError::Decoder {
            message: format!("end_utt failed: {:?}", e),
        })?;
        self.decoder.start_utt(None).map_err(|e| WakeError::Decoder {
            message: format!("start_utt failed: {:?}", e),
        })
    }
}
