//! Error types for the event log writer.

use std::path::PathBuf;

use thiserror::Error;

/// Errors creating a writer. Once a writer is running, I/O failures are
/// counted and logged instead of surfaced, so the instrumented program is
/// never disturbed by its own trace log.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The output directory could not be created.
    #[error("Cannot create output directory {path}: {source}")]
    CreateDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be created.
    #[error("Cannot create log file {path}: {source}")]
    CreateFile {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The consumer thread could not be spawned.
    #[error("Cannot spawn writer thread: {source}")]
    SpawnThread {
        /// Underlying spawn failure.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for writer construction.
pub type WriterResult<T> = std::result::Result<T, WriterError>;
