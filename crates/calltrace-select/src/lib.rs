//! Method-selection engine for calltrace.
//!
//! This crate decides, per method signature, whether a method should be
//! instrumented and how:
//!
//! - [`MethodSignature`] / [`TypeKind`]: the matching and boxing key parsed
//!   from a textual descriptor.
//! - [`MethodPattern`]: a single selection rule with segment wildcards and an
//!   optional argument-capture marker.
//! - [`grammar`]: the `[!]Class.method(params)` line format the rule-editing
//!   collaborator reads and writes.
//! - [`SelectionSet`] / [`SelectionStore`]: include/exclude collections with
//!   copy-on-write snapshot publication for load-time readers.
//!
//! # Example
//!
//! ```
//! use calltrace_select::{grammar, MethodSignature, SelectionSet};
//!
//! let rules = grammar::parse_rules("*.*(*)\n!demo.Calc.slow(*)\n").unwrap();
//! let set = SelectionSet::from_rules(rules);
//!
//! let fast = MethodSignature::parse_descriptor("demo.Calc", "fast", "()i32").unwrap();
//! let slow = MethodSignature::parse_descriptor("demo.Calc", "slow", "()i32").unwrap();
//! assert!(set.is_selected(&fast));
//! assert!(!set.is_selected(&slow));
//! ```

pub mod error;
pub mod grammar;
pub mod pattern;
pub mod set;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use grammar::{RuleLine, format_rule_line, parse_rule_line, parse_rules};
pub use pattern::{MethodPattern, ParamPattern, ParamToken};
pub use set::{Instrumentation, SelectionSet, SelectionStore};
pub use types::{MethodSignature, ReturnKind, TypeKind};
