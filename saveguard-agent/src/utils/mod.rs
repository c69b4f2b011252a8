//! Utility modules for the save guard.

pub mod errors;
pub mod logger;

pub use errors::{Result, SaveGuardError};
pub use logger::{LogSink, Severity, TracingSink};
