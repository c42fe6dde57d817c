//! Trace event model and binary log codec for calltrace.
//!
//! This crate defines what instrumented methods produce and how it is
//! persisted:
//!
//! - [`Value`]: kind-tagged boxed values with an `Object` fallback.
//! - [`Event`]: the Enter/Exit/Exception variants under a shared
//!   time/thread envelope.
//! - [`EventSink`]: the seam through which probe code hands events to
//!   consumers, with [`FanoutSink`] and [`CollectingSink`] helpers.
//! - [`codec`]: the length-delimited binary record format of the log file.
//!
//! # Example
//!
//! ```
//! use calltrace_event::{codec, Event, Value};
//!
//! let event = Event::Exit {
//!     thread_id: 1,
//!     time_ms: calltrace_event::now_ms(),
//!     return_value: Some(Value::from(42i32)),
//! };
//!
//! let mut buf = Vec::new();
//! codec::write_event(&mut buf, &event).unwrap();
//! assert_eq!(codec::read_event(&mut buf.as_slice()).unwrap(), Some(event));
//! ```

pub mod codec;
pub mod event;
pub mod sink;
pub mod value;

pub use codec::{CodecError, CodecResult};
pub use event::{Event, now_ms};
pub use sink::{CollectingSink, EventSink, FanoutSink, LoggingSink};
pub use value::Value;
