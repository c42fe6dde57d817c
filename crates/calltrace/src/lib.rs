//! # calltrace - Selective Method Instrumentation
//!
//! calltrace rewrites method bodies at load time to emit Enter, Exit, and
//! Exception events for exactly the methods a rule set selects, and streams
//! those events to a binary log without blocking the traced code.
//!
//! ## Features
//!
//! - **Selection**: include/exclude rules with wildcards; exclusion always
//!   wins, and rule edits publish atomically to concurrent loaders
//! - **Rewriting**: probes at entry, every return, and every exception
//!   propagation point, without disturbing original semantics
//! - **Event log**: non-blocking producers, a single writer thread, and
//!   numbered log files that never overwrite a previous run
//! - **Embeddable**: library-first design; the CLI is a thin layer on top
//!
//! ## Quick Start
//!
//! ```
//! use calltrace::prelude::*;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let tracer = Tracer::builder()
//!     .with_rules("demo.*.*(*)\n!demo.Calc.slow(*)\n")
//!     .with_output_dir(dir.path())
//!     .build()
//!     .unwrap();
//!
//! let unit = CodeUnit::new("demo.Calc").with_method(Method {
//!     name: "run".to_string(),
//!     descriptor: "()void".to_string(),
//!     flags: MethodFlags { is_static: true, ..MethodFlags::default() },
//!     body: MethodBody { instrs: vec![Instr::Return], handlers: Vec::new(), max_locals: 0 },
//! });
//!
//! let outcome = tracer.on_load(unit).unwrap();
//! assert!(outcome.is_rewritten());
//!
//! let mut machine = tracer.machine();
//! machine.load_unit(outcome.into_unit()).unwrap();
//! machine.call("demo.Calc", "run", &[]).unwrap();
//!
//! assert!(tracer.shutdown(Duration::from_secs(5)));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Your Application                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                   calltrace (facade)                    │
//! │                   ┌────────────────┐                    │
//! │                   │ Tracer Builder │                    │
//! │                   └───────┬────────┘                    │
//! │                           │                             │
//! │  ┌──────────────────┬─────┴────────────┬────────────┐   │
//! │  │ calltrace-select │ calltrace-ir     │ calltrace- │   │
//! │  │ (rules,          │ (rewriter,       │ log        │   │
//! │  │  snapshots)      │  interpreter)    │ (writer)   │   │
//! │  └──────────────────┴──────────────────┴────────────┘   │
//! │                  calltrace-event (model, codec)         │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use calltrace_event::{EventSink, FanoutSink};
use calltrace_ir::{CodeUnit, LoadOutcome, Machine, rewrite_unit};
use calltrace_log::{EventLogWriter, WriterConfig, WriterStats};
use calltrace_select::{SelectionSet, SelectionStore, grammar};

// Re-export from sub-crates
pub use calltrace_event;
pub use calltrace_ir;
pub use calltrace_log;
pub use calltrace_select;

/// Main entry point.
pub struct Tracer {
    selection: SelectionStore,
    sink: Arc<FanoutSink>,
    writer: Option<Arc<EventLogWriter>>,
}

impl Tracer {
    /// Create a tracer builder.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::new()
    }

    /// Transform a code unit under the currently published rules.
    ///
    /// The decision is made against one consistent rule snapshot; an edit
    /// assigned concurrently affects later loads, never this one.
    ///
    /// # Errors
    ///
    /// Fails when any method of the unit has an unparseable descriptor; the
    /// caller should load the original unit untouched in that case.
    pub fn on_load(&self, unit: CodeUnit) -> Result<LoadOutcome, TracerError> {
        let snapshot = self.selection.snapshot();
        Ok(rewrite_unit(unit, &snapshot)?)
    }

    /// The selection store, for taking snapshots and assigning edited rule
    /// sets.
    pub fn selection(&self) -> &SelectionStore {
        &self.selection
    }

    /// The sink probes should emit into: the writer plus any extra sinks
    /// registered at build time.
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.sink) as Arc<dyn EventSink>
    }

    /// An interpreter wired to this tracer's sink.
    pub fn machine(&self) -> Machine {
        Machine::new(self.sink())
    }

    /// Path of the event log file, when disk logging is enabled.
    pub fn log_path(&self) -> Option<&Path> {
        self.writer.as_deref().map(EventLogWriter::path)
    }

    /// Writer counters, when disk logging is enabled.
    pub fn writer_stats(&self) -> Option<WriterStats> {
        self.writer.as_deref().map(EventLogWriter::stats)
    }

    /// Whether every accepted event has reached the log.
    pub fn is_idle(&self) -> bool {
        self.writer.as_deref().is_none_or(EventLogWriter::is_idle)
    }

    /// Stop the event log and wait up to `timeout` for the backlog to
    /// drain. Returns whether everything was flushed in time; trivially
    /// true without disk logging.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        match self.writer.as_deref() {
            Some(writer) => writer.shutdown(timeout),
            None => true,
        }
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("log_path", &self.log_path())
            .finish()
    }
}

/// Builder for configuring a [`Tracer`].
pub struct TracerBuilder {
    rules: String,
    output_dir: Option<PathBuf>,
    file_prefix: Option<String>,
    file_extension: Option<String>,
    extra_sinks: Vec<Arc<dyn EventSink>>,
}

impl TracerBuilder {
    /// Create a builder with no rules and no disk logging.
    pub fn new() -> Self {
        Self {
            rules: String::new(),
            output_dir: None,
            file_prefix: None,
            file_extension: None,
            extra_sinks: Vec::new(),
        }
    }

    /// Append selection rules in the line grammar, one rule per line with
    /// `!` marking exclusions.
    pub fn with_rules(mut self, rules: &str) -> Self {
        self.rules.push_str(rules);
        if !rules.ends_with('\n') {
            self.rules.push('\n');
        }
        self
    }

    /// Enable disk logging into this directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Override the log file prefix.
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = Some(prefix.into());
        self
    }

    /// Override the log file extension.
    pub fn with_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = Some(extension.into());
        self
    }

    /// Register an extra sink; every probe event is delivered to it as well
    /// as to the log.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    /// Build the tracer.
    ///
    /// # Errors
    ///
    /// Fails when a rule line does not parse or the event log cannot be
    /// created.
    pub fn build(self) -> Result<Tracer, TracerError> {
        let rules = grammar::parse_rules(&self.rules)?;
        let selection = SelectionStore::new(SelectionSet::from_rules(rules));

        let sink = Arc::new(FanoutSink::default());
        let writer = match self.output_dir {
            Some(dir) => {
                let mut config = WriterConfig::new(dir);
                if let Some(prefix) = self.file_prefix {
                    config = config.with_file_prefix(prefix);
                }
                if let Some(extension) = self.file_extension {
                    config = config.with_file_extension(extension);
                }
                let writer = Arc::new(EventLogWriter::create(config)?);
                sink.register(Arc::clone(&writer) as Arc<dyn EventSink>);
                Some(writer)
            }
            None => None,
        };
        for extra in self.extra_sinks {
            sink.register(extra);
        }

        Ok(Tracer {
            selection,
            sink,
            writer,
        })
    }
}

impl Default for TracerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors from the tracer facade.
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    /// Rule or descriptor parse error.
    #[error("Parse error: {0}")]
    Parse(#[from] calltrace_select::ParseError),

    /// Load-time rewrite error.
    #[error("Rewrite error: {0}")]
    Rewrite(#[from] calltrace_ir::RewriteError),

    /// Event log error.
    #[error("Event log error: {0}")]
    Log(#[from] calltrace_log::WriterError),
}

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{Tracer, TracerBuilder, TracerError};

    // Selection types
    pub use calltrace_select::{
        MethodPattern, MethodSignature, ParamPattern, SelectionSet, SelectionStore, TypeKind,
    };

    // Code model types
    pub use calltrace_ir::{
        CodeUnit, Instr, Label, LoadOutcome, Machine, Method, MethodBody, MethodFlags, Outcome,
        RtValue,
    };

    // Event types
    pub use calltrace_event::{CollectingSink, Event, EventSink, Value};

    // Log types
    pub use calltrace_log::{EventLogWriter, WriterConfig, WriterStats};

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltrace_event::{CollectingSink, Event, codec};
    use calltrace_ir::{Const, Instr, Method, MethodBody, MethodFlags, RtValue};
    use std::fs::File;

    fn static_method(name: &str, descriptor: &str, instrs: Vec<Instr>, max_locals: u16) -> Method {
        Method {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            flags: MethodFlags {
                is_static: true,
                ..MethodFlags::default()
            },
            body: MethodBody {
                instrs,
                handlers: Vec::new(),
                max_locals,
            },
        }
    }

    fn calc_unit() -> CodeUnit {
        CodeUnit::new("demo.Calc").with_method(static_method(
            "answer",
            "()i32",
            vec![Instr::Push(Const::I32(42)), Instr::Return],
            0,
        ))
    }

    #[test]
    fn test_end_to_end_log_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tracer = Tracer::builder()
            .with_rules("*.*(*)")
            .with_output_dir(dir.path())
            .build()
            .unwrap();

        let outcome = tracer.on_load(calc_unit()).unwrap();
        assert!(outcome.is_rewritten());

        let mut machine = tracer.machine();
        machine.load_unit(outcome.into_unit()).unwrap();
        machine.call("demo.Calc", "answer", &[]).unwrap();

        let path = tracer.log_path().unwrap().to_path_buf();
        assert!(tracer.shutdown(Duration::from_secs(5)));

        let mut file = File::open(path).unwrap();
        let events = codec::read_all(&mut file).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, ["enter", "exit"]);
        match &events[1] {
            Event::Exit { return_value, .. } => {
                assert_eq!(return_value, &Some(calltrace_event::Value::I32(42)));
            }
            other => panic!("expected exit, got {other}"),
        }
    }

    #[test]
    fn test_every_enter_pairs_with_an_outcome() {
        // A call tree where the deepest call throws: each entered method
        // must produce exactly one exit or exception event.
        let collector = Arc::new(CollectingSink::default());
        let tracer = Tracer::builder()
            .with_rules("*.*(*)")
            .with_sink(collector.clone())
            .build()
            .unwrap();

        let unit = CodeUnit::new("demo.Chain")
            .with_method(static_method(
                "outer",
                "()void",
                vec![
                    Instr::Call {
                        class_name: "demo.Chain".to_string(),
                        method_name: "inner".to_string(),
                    },
                    Instr::Return,
                ],
                0,
            ))
            .with_method(static_method(
                "inner",
                "()void",
                vec![
                    Instr::Push(Const::Obj {
                        type_name: "demo.Oops".to_string(),
                        text: "deep".to_string(),
                    }),
                    Instr::Throw,
                ],
                0,
            ));

        let mut machine = tracer.machine();
        machine
            .load_unit(tracer.on_load(unit).unwrap().into_unit())
            .unwrap();
        let outcome = machine.call("demo.Chain", "outer", &[]).unwrap();
        assert!(outcome.is_thrown());

        let events = collector.events();
        let enters = events.iter().filter(|e| e.event_type() == "enter").count();
        let outcomes = events
            .iter()
            .filter(|e| matches!(e.event_type(), "exit" | "exception"))
            .count();
        assert_eq!(enters, 2);
        assert_eq!(outcomes, 2);
    }

    #[test]
    fn test_each_invocation_emits_one_enter_and_one_outcome() {
        let collector = Arc::new(CollectingSink::default());
        let tracer = Tracer::builder()
            .with_rules("*.*(*)")
            .with_sink(collector.clone())
            .build()
            .unwrap();

        let unit = CodeUnit::new("demo.Filter").with_method(static_method(
            "accepts",
            "(i32,string)bool",
            vec![Instr::Push(Const::Bool(true)), Instr::Return],
            2,
        ));
        let mut machine = tracer.machine();
        machine
            .load_unit(tracer.on_load(unit).unwrap().into_unit())
            .unwrap();

        for n in 0..3 {
            machine
                .call(
                    "demo.Filter",
                    "accepts",
                    &[RtValue::I32(n), RtValue::object("string", "probe")],
                )
                .unwrap();
        }

        let kinds: Vec<&str> = collector.events().iter().map(|e| e.event_type()).collect();
        assert_eq!(kinds, ["enter", "exit", "enter", "exit", "enter", "exit"]);
    }

    #[test]
    fn test_capture_boxes_receiver_and_arguments() {
        let collector = Arc::new(CollectingSink::default());
        let tracer = Tracer::builder()
            .with_rules("*.*(*+)")
            .with_sink(collector.clone())
            .build()
            .unwrap();

        let unit = CodeUnit::new("demo.Counter")
            .with_method(Method {
                name: "bump".to_string(),
                descriptor: "()void".to_string(),
                flags: MethodFlags::default(),
                body: MethodBody {
                    instrs: vec![Instr::Return],
                    handlers: Vec::new(),
                    max_locals: 1,
                },
            })
            .with_method(static_method("tick", "()void", vec![Instr::Return], 0));

        let mut machine = tracer.machine();
        machine
            .load_unit(tracer.on_load(unit).unwrap().into_unit())
            .unwrap();
        machine
            .call(
                "demo.Counter",
                "bump",
                &[RtValue::object("demo.Counter", "Counter(0)")],
            )
            .unwrap();
        machine.call("demo.Counter", "tick", &[]).unwrap();

        let events = collector.events();
        // Instance method: the receiver occupies one captured slot.
        match &events[0] {
            Event::Enter { parameters, .. } => {
                assert_eq!(parameters.as_ref().map(Vec::len), Some(1));
            }
            other => panic!("expected enter, got {other}"),
        }
        // Static zero-argument method: capture yields a present, empty list.
        match &events[2] {
            Event::Enter { parameters, .. } => {
                assert_eq!(parameters.as_ref().map(Vec::len), Some(0));
            }
            other => panic!("expected enter, got {other}"),
        }
    }

    #[test]
    fn test_rule_edits_affect_later_loads_only() {
        let tracer = Tracer::builder().with_rules("*.*(*)").build().unwrap();

        let before = tracer.on_load(calc_unit()).unwrap();
        assert!(before.is_rewritten());

        let mut copy = tracer.selection().edit_copy();
        copy.add_rule(
            calltrace_select::parse_rule_line("!demo.Calc.*(*)")
                .unwrap()
                .pattern,
            true,
        );
        tracer.selection().assign(copy);

        let after = tracer.on_load(calc_unit()).unwrap();
        assert!(!after.is_rewritten());
    }

    #[test]
    fn test_bad_rule_line_fails_build() {
        let err = Tracer::builder()
            .with_rules("*.*(*)\nnot a rule\n")
            .build()
            .unwrap_err();
        assert!(matches!(err, TracerError::Parse(_)));
    }
}
