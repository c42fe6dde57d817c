//! Code model, probe-inserting rewriter, and interpreter for calltrace.
//!
//! - [`instr`] / [`unit`]: a stack-based instruction set over labelled
//!   streams, grouped into per-class [`CodeUnit`]s.
//! - [`rewrite`]: the load-time pass that splices Enter/Exit/Exception
//!   probes into selected methods without disturbing original semantics.
//! - [`machine`]: a small interpreter that runs original and rewritten
//!   bodies alike, emitting probe events into an
//!   [`EventSink`](calltrace_event::EventSink).
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use calltrace_event::CollectingSink;
//! use calltrace_ir::{CodeUnit, Instr, Machine, Method, MethodBody, MethodFlags, rewrite_unit};
//! use calltrace_select::{SelectionSet, parse_rules};
//!
//! let unit = CodeUnit::new("demo.Noop").with_method(Method {
//!     name: "run".to_string(),
//!     descriptor: "()void".to_string(),
//!     flags: MethodFlags { is_static: true, ..MethodFlags::default() },
//!     body: MethodBody { instrs: vec![Instr::Return], handlers: Vec::new(), max_locals: 0 },
//! });
//!
//! let selection = SelectionSet::from_rules(parse_rules("*.*(*)").unwrap());
//! let outcome = rewrite_unit(unit, &selection).unwrap();
//!
//! let sink = Arc::new(CollectingSink::default());
//! let mut machine = Machine::new(sink.clone());
//! machine.load_unit(outcome.into_unit()).unwrap();
//! machine.call("demo.Noop", "run", &[]).unwrap();
//! assert_eq!(sink.len(), 2);
//! ```

pub mod error;
pub mod instr;
pub mod machine;
pub mod rewrite;
pub mod unit;

pub use error::{MachineError, MachineResult, RewriteError, RewriteResult};
pub use instr::{BinOp, Const, Instr, Label, ProbeKind};
pub use machine::{Machine, ObjectData, Outcome, RtValue};
pub use rewrite::{LoadOutcome, is_instrumentable, rewrite_unit};
pub use unit::{CodeUnit, HandlerEntry, Method, MethodBody, MethodFlags};
