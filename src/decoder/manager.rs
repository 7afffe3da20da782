//! Decoder table keyed by (site, wakeword).
//!
//! Each pair gets a [`DecoderStation`] running on its own thread. Frames,
//! resets and reloads travel down the same queue, so a reload can only land
//! between two frames and never races an in-flight decode. Only frames
//! count against the queue limit; control commands are never refused and
//! never block the caller.

use crate::config::WakewordConfig;
use crate::decoder::engine::{DecoderLoader, KeywordDecoder};
use crate::decoder::handle::{DecoderHandle, DecoderKey, DetectionResult};
use crate::error::{Result, WakeError};
use crate::pipeline::{ErrorReporter, LogReporter, Station, StationError, StationRunner};
use crossbeam_channel::{Sender, unbounded};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info, warn};

/// Work item for a decoder worker.
#[derive(Debug, Clone)]
pub enum DecoderCommand {
    /// Load the decoder if it is not loaded yet
    Load,
    /// One complete frame of 16-bit samples, tagged with the site's
    /// disable epoch at the time it was queued
    Frame { samples: Arc<[i16]>, epoch: u64 },
    /// Drop the partial utterance and re-arm detection
    Reset,
    /// Swap in a freshly loaded decoder
    Reload,
}

/// A positive decode.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    pub site_id: String,
    pub wakeword_id: String,
    pub timestamp: SystemTime,
    pub confidence: Option<f32>,
    /// Disable epoch of the frame that completed the keyphrase
    pub epoch: u64,
}

/// Everything a worker reports back to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderOutput {
    Detected(DetectionEvent),
    /// A load or reload failed; `context` names which.
    Failed {
        key: DecoderKey,
        error: String,
        context: String,
    },
}

/// Station that owns one decoder handle.
pub struct DecoderStation {
    handle: DecoderHandle,
    name: String,
    backlog: Arc<AtomicUsize>,
    warned_not_ready: bool,
}

impl DecoderStation {
    /// `backlog` counts frames queued for this station; it is decremented
    /// as each frame is taken off the queue.
    pub fn new(handle: DecoderHandle, backlog: Arc<AtomicUsize>) -> Self {
        let name = handle.key().to_string();
        Self {
            handle,
            name,
            backlog,
            warned_not_ready: false,
        }
    }

    fn decode(
        &mut self,
        samples: &[i16],
        epoch: u64,
    ) -> std::result::Result<Option<DecoderOutput>, StationError> {
        match self.handle.process(samples) {
            Ok(DetectionResult::Detected { confidence }) => {
                let key = self.handle.key();
                debug!(pair = %self.name, ?confidence, epoch, "Keyphrase detected");
                Ok(Some(DecoderOutput::Detected(DetectionEvent {
                    site_id: key.site_id.clone(),
                    wakeword_id: key.wakeword_id.clone(),
                    timestamp: SystemTime::now(),
                    confidence,
                    epoch,
                })))
            }
            Ok(DetectionResult::None) => Ok(None),
            Err(e @ WakeError::DecoderNotReady { .. }) => {
                if !self.warned_not_ready {
                    warn!(pair = %self.name, "{}, dropping frames", e);
                    self.warned_not_ready = true;
                }
                Ok(None)
            }
            Err(e) => Err(StationError::Recoverable(e.to_string())),
        }
    }

    fn failed(&self, error: &WakeError, context: &str) -> DecoderOutput {
        DecoderOutput::Failed {
            key: self.handle.key().clone(),
            error: error.to_string(),
            context: context.to_string(),
        }
    }
}

impl Station for DecoderStation {
    type Input = DecoderCommand;
    type Output = DecoderOutput;

    fn process(
        &mut self,
        command: DecoderCommand,
    ) -> std::result::Result<Option<DecoderOutput>, StationError> {
        match command {
            DecoderCommand::Load => match self.handle.load() {
                Ok(()) => {
                    info!(pair = %self.name, "Decoder loaded");
                    Ok(None)
                }
                Err(e) => {
                    warn!(pair = %self.name, error = %e, "Failed to load decoder");
                    Ok(Some(self.failed(&e, "load")))
                }
            },
            DecoderCommand::Frame { samples, epoch } => {
                self.backlog
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
                    .ok();
                self.decode(&samples, epoch)
            }
            DecoderCommand::Reset => {
                self.handle
                    .reset()
                    .map_err(|e| StationError::Recoverable(e.to_string()))?;
                Ok(None)
            }
            DecoderCommand::Reload => match self.handle.reload() {
                Ok(()) => {
                    self.warned_not_ready = false;
                    info!(
                        pair = %self.name,
                        generation = self.handle.generation(),
                        "Decoder reloaded"
                    );
                    Ok(None)
                }
                Err(e) => {
                    warn!(pair = %self.name, error = %e, "Reload failed");
                    Ok(Some(self.failed(&e, "reload")))
                }
            },
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn shutdown(&mut self) {
        self.handle.unload();
        debug!(pair = %self.name, "Decoder released");
    }
}

struct Worker {
    commands: Sender<DecoderCommand>,
    backlog: Arc<AtomicUsize>,
    runner: StationRunner,
}

/// Owns every decoder worker.
pub struct DecoderManager {
    loader: Arc<dyn DecoderLoader>,
    workers: HashMap<DecoderKey, Worker>,
    preloaded: HashMap<String, Box<dyn KeywordDecoder>>,
    outputs: UnboundedSender<DecoderOutput>,
    queue_capacity: usize,
    reporter: Arc<dyn ErrorReporter>,
}

impl DecoderManager {
    /// Creates an empty table and the channel its workers report on.
    ///
    /// `queue_capacity` bounds the frames waiting per worker.
    pub fn new(
        loader: Arc<dyn DecoderLoader>,
        queue_capacity: usize,
    ) -> (Self, UnboundedReceiver<DecoderOutput>) {
        let (outputs, receiver) = unbounded_channel();
        let manager = Self {
            loader,
            workers: HashMap::new(),
            preloaded: HashMap::new(),
            outputs,
            queue_capacity: queue_capacity.max(1),
            reporter: Arc::new(LogReporter),
        };
        (manager, receiver)
    }

    /// Loads a decoder for `config` ahead of any audio.
    ///
    /// The decoder is handed to the first site that needs this wakeword.
    pub fn preload(&mut self, config: &WakewordConfig) -> Result<()> {
        let decoder = self.loader.load(config)?;
        self.preloaded.insert(config.wakeword_id.clone(), decoder);
        Ok(())
    }

    /// Drops a preloaded decoder that no site has claimed yet.
    pub fn forget_preloaded(&mut self, wakeword_id: &str) -> bool {
        self.preloaded.remove(wakeword_id).is_some()
    }

    /// Returns the key of the pair's worker, spawning it on first use.
    ///
    /// A new worker either adopts a preloaded decoder or loads one on its
    /// own thread; a failed load is reported on the output channel.
    pub fn get_or_create(&mut self, site_id: &str, config: &Arc<WakewordConfig>) -> Result<DecoderKey> {
        let key = DecoderKey::new(site_id, &config.wakeword_id);
        if self.workers.contains_key(&key) {
            return Ok(key);
        }

        let loader = Arc::clone(&self.loader);
        let (handle, needs_load) = match self.preloaded.remove(&config.wakeword_id) {
            Some(decoder) => (
                DecoderHandle::with_decoder(key.clone(), Arc::clone(config), loader, decoder),
                false,
            ),
            None => (DecoderHandle::new(key.clone(), Arc::clone(config), loader), true),
        };

        let (commands, queue) = unbounded();
        if needs_load {
            commands
                .send(DecoderCommand::Load)
                .map_err(|e| WakeError::Other(format!("cannot queue load for {}: {}", key, e)))?;
        }

        let backlog = Arc::new(AtomicUsize::new(0));
        let runner = StationRunner::spawn(
            DecoderStation::new(handle, Arc::clone(&backlog)),
            queue,
            self.outputs.clone(),
            Arc::clone(&self.reporter),
        )?;
        debug!(pair = %key, "Decoder worker started");
        self.workers.insert(
            key.clone(),
            Worker {
                commands,
                backlog,
                runner,
            },
        );
        Ok(key)
    }

    /// Queues a frame for the pair. Drops it with a warning if the worker is
    /// behind or gone; returns whether it was queued.
    pub fn process(&self, key: &DecoderKey, samples: Arc<[i16]>, epoch: u64) -> bool {
        let Some(worker) = self.workers.get(key) else {
            return false;
        };
        if worker.backlog.load(Ordering::SeqCst) >= self.queue_capacity {
            warn!(pair = %key, "Decoder queue full, dropping frame");
            return false;
        }

        worker.backlog.fetch_add(1, Ordering::SeqCst);
        if worker
            .commands
            .send(DecoderCommand::Frame { samples, epoch })
            .is_err()
        {
            worker.backlog.fetch_sub(1, Ordering::SeqCst);
            warn!(pair = %key, "Decoder worker stopped, dropping frame");
            return false;
        }
        true
    }

    /// Queues a reset behind the frames already waiting for the pair.
    pub fn reset(&self, key: &DecoderKey) -> bool {
        self.control(key, DecoderCommand::Reset)
    }

    /// Queues a reload behind the frames already waiting for the pair.
    pub fn reload(&self, key: &DecoderKey) -> bool {
        self.control(key, DecoderCommand::Reload)
    }

    fn control(&self, key: &DecoderKey, command: DecoderCommand) -> bool {
        let Some(worker) = self.workers.get(key) else {
            return false;
        };
        match worker.commands.send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(pair = %key, command = ?e.into_inner(), "Decoder worker stopped, command not delivered");
                false
            }
        }
    }

    pub fn contains(&self, key: &DecoderKey) -> bool {
        self.workers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &DecoderKey> {
        self.workers.keys()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Closes every queue and hands back the running workers.
    ///
    /// Nothing blocks here; [`WorkerShutdown::wait`] does the joining.
    pub fn close(&mut self) -> WorkerShutdown {
        self.preloaded.clear();
        let runners = self
            .workers
            .drain()
            .map(|(_, worker)| {
                drop(worker.commands);
                worker.runner
            })
            .collect();
        WorkerShutdown { runners }
    }

    /// Closes every queue and waits for the workers to finish what they
    /// already have. Their outputs are all on the channel once this returns.
    pub fn shutdown(&mut self) {
        self.close().wait();
    }
}

/// Workers whose queues were closed by [`DecoderManager::close`].
pub struct WorkerShutdown {
    runners: Vec<StationRunner>,
}

impl WorkerShutdown {
    /// Blocks until every worker has drained its queue and released its
    /// decoder.
    pub fn wait(self) {
        for runner in self.runners {
            let name = runner.name().to_string();
            if let Err(e) = runner.join() {
                warn!(pair = %name, "{}", e);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}
