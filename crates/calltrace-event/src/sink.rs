//! The seam between probe code and event consumers.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::event::Event;

/// Receives events from instrumented call sites.
///
/// Implementations must be cheap and non-blocking: `emit` runs inline on
/// whichever application thread executes the instrumented method.
pub trait EventSink: Send + Sync {
    /// Accept one event. Ownership transfers; the event is consumed once.
    fn emit(&self, event: Event);
}

/// A sink that forwards each event to every registered sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl FanoutSink {
    /// Create an empty fanout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn register(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    /// Whether no sinks are registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: Event) {
        let sinks = self.sinks.read();
        if let Some((last, rest)) = sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

impl std::fmt::Debug for FanoutSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutSink")
            .field("sinks", &self.len())
            .finish()
    }
}

/// A sink that mirrors events into the process's `tracing` output, for
/// diagnosing instrumentation without decoding the log file.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl LoggingSink {
    /// Create the sink.
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LoggingSink {
    fn emit(&self, event: Event) {
        tracing::trace!(
            event = event.event_type(),
            thread_id = event.thread_id(),
            "{}",
            event
        );
    }
}

/// A sink that stores events in memory, mainly for tests and inspection.
#[derive(Default)]
pub struct CollectingSink {
    events: RwLock<Vec<Event>>,
}

impl CollectingSink {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected events, in emission order.
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Number of collected events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drop all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        self.events.write().push(event);
    }
}
