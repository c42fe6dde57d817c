//! Event log persistence for calltrace.
//!
//! The [`EventLogWriter`] decouples instrumented code from disk: producers
//! enqueue events without blocking, a single consumer thread appends
//! length-delimited binary records to a numbered log file, and I/O failures
//! are absorbed rather than surfaced back into the traced program.

pub mod error;
pub mod writer;

pub use error::{WriterError, WriterResult};
pub use writer::{EventLogWriter, WriterConfig, WriterStats};
