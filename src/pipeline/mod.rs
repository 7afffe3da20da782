//! Thread-per-station processing.
//!
//! Every station runs in its own thread and consumes a crossbeam channel, so
//! a station's state is only ever touched by one thread.

pub mod error;
pub mod station;

pub use error::{ErrorReporter, LogReporter, StationError};
pub use station::{Station, StationRunner};
