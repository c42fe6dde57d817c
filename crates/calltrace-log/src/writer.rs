//! The asynchronous event log writer.
//!
//! Producers hand events to [`EventLogWriter::emit`] through an unbounded
//! channel and return immediately; a single named consumer thread encodes
//! each record and appends it to the log file with a flush per record, so a
//! crash of the instrumented program loses at most the record in flight.
//! I/O failures never reach producers: the record is dropped, counted, and
//! logged.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use calltrace_event::{Event, EventSink, codec};

use crate::error::{WriterError, WriterResult};

/// How long [`Drop`] waits for the backlog before detaching the thread.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Writer configuration.
///
/// Log files are named `{file_prefix}{N}.{file_extension}` where `N`
/// continues from the largest number already present in the output
/// directory, so consecutive runs never overwrite each other.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Directory the log file is created in.
    pub output_dir: PathBuf,
    /// File name prefix.
    pub file_prefix: String,
    /// File name extension, without the dot.
    pub file_extension: String,
    /// Sleep between drain checks while shutting down.
    pub poll_interval: Duration,
}

impl WriterConfig {
    /// Defaults with the given output directory.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: "events".to_string(),
            file_extension: "trc".to_string(),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Override the file name prefix.
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Override the file name extension.
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Override the shutdown poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    added: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
    pending: AtomicU64,
}

/// A point-in-time snapshot of the writer's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterStats {
    /// Events accepted from producers.
    pub added: u64,
    /// Records written to the file.
    pub written: u64,
    /// Events lost to I/O failures or a stopped consumer.
    pub dropped: u64,
    /// Events accepted but not yet handled by the consumer.
    pub pending: u64,
}

/// The event log writer: an [`EventSink`] backed by a single consumer
/// thread appending length-delimited records to one file.
pub struct EventLogWriter {
    sender: Mutex<Option<Sender<Event>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    path: PathBuf,
    poll_interval: Duration,
}

impl EventLogWriter {
    /// Create the log file and start the consumer thread.
    ///
    /// # Errors
    ///
    /// Fails when the output directory or log file cannot be created, or
    /// the consumer thread cannot be spawned.
    pub fn create(config: WriterConfig) -> WriterResult<Self> {
        fs::create_dir_all(&config.output_dir).map_err(|source| WriterError::CreateDir {
            path: config.output_dir.clone(),
            source,
        })?;

        let index = largest_file_index(
            &config.output_dir,
            &config.file_prefix,
            &config.file_extension,
        ) + 1;
        let path = config.output_dir.join(format!(
            "{}{index}.{}",
            config.file_prefix, config.file_extension
        ));
        let file = File::create(&path).map_err(|source| WriterError::CreateFile {
            path: path.clone(),
            source,
        })?;

        let (sender, receiver) = unbounded();
        let counters = Arc::new(Counters::default());
        let handle = thread::Builder::new()
            .name("calltrace-log-writer".to_string())
            .spawn({
                let counters = Arc::clone(&counters);
                let path = path.clone();
                move || consume(receiver, file, counters, path)
            })
            .map_err(|source| WriterError::SpawnThread { source })?;

        info!(path = %path.display(), "Event log writer started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            counters,
            path,
            poll_interval: config.poll_interval,
        })
    }

    /// Path of the log file this writer appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether every accepted event has been handled.
    pub fn is_idle(&self) -> bool {
        self.counters.pending.load(Ordering::Acquire) == 0
    }

    /// Current counter values.
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            added: self.counters.added.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            pending: self.counters.pending.load(Ordering::Acquire),
        }
    }

    /// Stop accepting events and wait up to `timeout` for the backlog to
    /// drain, polling at the configured interval.
    ///
    /// Returns whether the backlog drained in time. On timeout the consumer
    /// thread is left to finish the backlog on its own; it exits once the
    /// channel is empty either way.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let Some(sender) = self.sender.lock().take() else {
            return self.is_idle();
        };
        drop(sender);

        let deadline = Instant::now() + timeout;
        while !self.is_idle() && Instant::now() < deadline {
            thread::sleep(self.poll_interval);
        }

        let drained = self.is_idle();
        if drained {
            if let Some(handle) = self.handle.lock().take() {
                let _ = handle.join();
            }
            debug!(path = %self.path.display(), "Event log writer drained");
        } else {
            warn!(
                path = %self.path.display(),
                pending = self.counters.pending.load(Ordering::Acquire),
                "Timed out draining event log"
            );
        }
        drained
    }
}

impl EventSink for EventLogWriter {
    fn emit(&self, event: Event) {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        self.counters.added.fetch_add(1, Ordering::Relaxed);
        self.counters.pending.fetch_add(1, Ordering::Release);
        if sender.send(event).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::Release);
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Writer thread stopped; event dropped");
        }
    }
}

impl Drop for EventLogWriter {
    fn drop(&mut self) {
        self.shutdown(DEFAULT_SHUTDOWN_TIMEOUT);
    }
}

/// The consumer loop: drain the channel until every sender is gone, one
/// flushed record per event.
fn consume(receiver: Receiver<Event>, file: File, counters: Arc<Counters>, path: PathBuf) {
    let mut writer = BufWriter::new(file);
    for event in receiver.iter() {
        let result = codec::write_event(&mut writer, &event)
            .and_then(|()| writer.flush().map_err(Into::into));
        match result {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(path = %path.display(), %err, "Failed to write event record");
            }
        }
        counters.pending.fetch_sub(1, Ordering::Release);
    }
    debug!(path = %path.display(), "Event log writer stopped");
}

/// The largest number embedded in a `{prefix}{N}.{extension}` file name in
/// `dir`, or 0 when none exists. The next log file uses this plus one.
fn largest_file_index(dir: &Path, prefix: &str, extension: &str) -> u64 {
    let suffix = format!(".{extension}");
    let mut largest = 0u64;
    let Ok(entries) = fs::read_dir(dir) else {
        return largest;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(digits) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
        else {
            continue;
        };
        if let Ok(index) = digits.parse::<u64>() {
            largest = largest.max(index);
        }
    }
    largest
}
