//! Trace events emitted by instrumented methods.
//!
//! Every event carries the same envelope (wall-clock milliseconds and the
//! producing thread's identifier) around one of three variants. An event is
//! created by probe code at a call site, enqueued immediately, and consumed
//! exactly once by the log writer; it has no identity beyond its position in
//! the queue.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A single trace event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A selected method was entered.
    Enter {
        /// Identifier of the calling thread.
        thread_id: i64,
        /// Wall-clock milliseconds since the Unix epoch.
        time_ms: i64,
        /// Dot-qualified class name.
        class_name: String,
        /// Plain method name.
        method_name: String,
        /// Whether the method is static.
        is_static: bool,
        /// Boxed receiver/arguments. `None` when there is nothing to record
        /// (static method without capture mode); under capture mode this is
        /// always present, possibly empty.
        parameters: Option<Vec<Value>>,
    },
    /// A selected method returned normally.
    Exit {
        /// Identifier of the calling thread.
        thread_id: i64,
        /// Wall-clock milliseconds since the Unix epoch.
        time_ms: i64,
        /// Boxed return value; `None` for void methods.
        return_value: Option<Value>,
    },
    /// An exception propagated out of a selected method.
    Exception {
        /// Identifier of the calling thread.
        thread_id: i64,
        /// Wall-clock milliseconds since the Unix epoch.
        time_ms: i64,
        /// The in-flight exception, boxed without being altered.
        thrown: Value,
    },
}

impl Event {
    /// Stable name of the variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Enter { .. } => "enter",
            Event::Exit { .. } => "exit",
            Event::Exception { .. } => "exception",
        }
    }

    /// Envelope timestamp.
    pub fn time_ms(&self) -> i64 {
        match self {
            Event::Enter { time_ms, .. }
            | Event::Exit { time_ms, .. }
            | Event::Exception { time_ms, .. } => *time_ms,
        }
    }

    /// Envelope thread identifier.
    pub fn thread_id(&self) -> i64 {
        match self {
            Event::Enter { thread_id, .. }
            | Event::Exit { thread_id, .. }
            | Event::Exception { thread_id, .. } => *thread_id,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Enter {
                thread_id,
                time_ms,
                class_name,
                method_name,
                is_static,
                parameters,
            } => {
                write!(
                    f,
                    "[{} t{}] enter {}.{}{}",
                    time_ms,
                    thread_id,
                    class_name,
                    method_name,
                    if *is_static { " (static)" } else { "" }
                )?;
                if let Some(parameters) = parameters {
                    let rendered: Vec<String> =
                        parameters.iter().map(ToString::to_string).collect();
                    write!(f, " [{}]", rendered.join(", "))?;
                }
                Ok(())
            }
            Event::Exit {
                thread_id,
                time_ms,
                return_value,
            } => match return_value {
                Some(value) => write!(f, "[{} t{}] exit -> {}", time_ms, thread_id, value),
                None => write!(f, "[{} t{}] exit", time_ms, thread_id),
            },
            Event::Exception {
                thread_id,
                time_ms,
                thrown,
            } => write!(f, "[{} t{}] exception {}", time_ms, thread_id, thrown),
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
