//! Worker threads that own one piece of mutable state each.

use crate::error::Result;
use crate::pipeline::error::{ErrorReporter, StationError};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::UnboundedSender;

/// State that is driven one queued item at a time from a dedicated thread.
pub trait Station: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Handles one queued item. `Ok(None)` means nothing to report.
    ///
    /// A [`StationError::Fatal`] ends the thread; a recoverable one is
    /// reported and the next item is taken.
    fn process(&mut self, input: Self::Input) -> std::result::Result<Option<Self::Output>, StationError>;

    /// Used for the thread name and in error reports.
    fn name(&self) -> &str;

    /// Runs on the worker thread after the last item.
    fn shutdown(&mut self) {}
}

/// Join handle for a station's thread.
pub struct StationRunner {
    thread: Option<JoinHandle<()>>,
    name: String,
}

impl StationRunner {
    /// Moves `station` onto a thread named `station-<name>`.
    ///
    /// The thread drains `queue` until every sender is gone, then calls
    /// [`Station::shutdown`]. It stops early on a fatal error or when
    /// `outputs` has no receiver left.
    pub fn spawn<S: Station>(
        station: S,
        queue: Receiver<S::Input>,
        outputs: UnboundedSender<S::Output>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self> {
        let name = station.name().to_string();
        let thread = thread::Builder::new()
            .name(format!("station-{}", name))
            .spawn(move || drive(station, queue, outputs, reporter))?;

        Ok(Self {
            thread: Some(thread),
            name,
        })
    }

    /// Blocks until the thread has finished.
    pub fn join(mut self) -> std::result::Result<(), String> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| format!("Station '{}' thread panicked", self.name)),
            None => Ok(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn drive<S: Station>(
    mut station: S,
    queue: Receiver<S::Input>,
    outputs: UnboundedSender<S::Output>,
    reporter: Arc<dyn ErrorReporter>,
) {
    for input in queue.iter() {
        let fatal = match station.process(input) {
            Ok(None) => false,
            Ok(Some(output)) => {
                if outputs.send(output).is_err() {
                    break;
                }
                false
            }
            Err(e) => {
                reporter.report(station.name(), &e);
                matches!(e, StationError::Fatal(_))
            }
        };
        if fatal {
            break;
        }
    }
    station.shutdown();
}
