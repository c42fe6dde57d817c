//! The probe-inserting rewriting pass.
//!
//! `rewrite_unit` runs once per code unit at load time, on a single thread,
//! and performs no I/O. For every selected method it produces a new body
//! that emits an Enter event on entry, an Exit event before every normal
//! return, and an Exception event on every path an exception would
//! propagate out. The rewrite never consumes, reorders, or duplicates an
//! operand the original code has live, and never changes the returned value,
//! the thrown exception object, or any control flow visible to the caller.

use tracing::{debug, info};

use calltrace_select::{MethodSignature, SelectionSet};

use crate::error::{RewriteError, RewriteResult};
use crate::instr::{Instr, Label, ProbeKind};
use crate::unit::{CodeUnit, HandlerEntry, Method, MethodBody};

/// Method names treated as object-identity/string-conversion utilities and
/// never instrumented, alongside constructors and synthetic methods.
const UTILITY_METHODS: [&str; 3] = ["toString", "hashCode", "equals"];

/// Result of transforming one code unit.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// At least one method was instrumented.
    Rewritten(CodeUnit),
    /// No method was selected; the unit is byte-for-byte the original.
    Unchanged(CodeUnit),
}

impl LoadOutcome {
    /// The transformed (or original) unit.
    pub fn unit(&self) -> &CodeUnit {
        match self {
            LoadOutcome::Rewritten(unit) | LoadOutcome::Unchanged(unit) => unit,
        }
    }

    /// Consume the outcome, yielding the unit to hand back to the loader.
    pub fn into_unit(self) -> CodeUnit {
        match self {
            LoadOutcome::Rewritten(unit) | LoadOutcome::Unchanged(unit) => unit,
        }
    }

    /// Whether any method was instrumented.
    pub fn is_rewritten(&self) -> bool {
        matches!(self, LoadOutcome::Rewritten(_))
    }
}

/// Whether a method may be instrumented at all, before rules are consulted.
pub fn is_instrumentable(method: &Method) -> bool {
    !method.flags.is_constructor
        && !method.flags.is_synthetic
        && !UTILITY_METHODS.contains(&method.name.as_str())
}

/// Transform one code unit according to the selection set.
///
/// Every method descriptor is parsed up front; a single unparseable
/// signature fails the whole unit so the loader never receives a partially
/// instrumented one.
pub fn rewrite_unit(unit: CodeUnit, selection: &SelectionSet) -> RewriteResult<LoadOutcome> {
    let mut signatures = Vec::with_capacity(unit.methods.len());
    for method in &unit.methods {
        let signature =
            MethodSignature::parse_descriptor(&unit.class_name, &method.name, &method.descriptor)
                .map_err(|source| RewriteError::BadSignature {
                    class_name: unit.class_name.clone(),
                    method_name: method.name.clone(),
                    source,
                })?;
        signatures.push(signature);
    }

    let mut methods = Vec::with_capacity(unit.methods.len());
    let mut instrumented = 0usize;
    for (method, signature) in unit.methods.into_iter().zip(signatures) {
        if !is_instrumentable(&method) {
            debug!(method = %signature, "Method not instrumentable");
            methods.push(method);
            continue;
        }
        match selection.decide(&signature) {
            Some(decision) => {
                debug!(
                    method = %signature,
                    capture = decision.capture_arguments,
                    "Instrumenting method"
                );
                instrumented += 1;
                methods.push(Method {
                    body: rewrite_body(method.body, decision.capture_arguments),
                    ..method
                });
            }
            None => methods.push(method),
        }
    }

    let unit = CodeUnit {
        class_name: unit.class_name,
        methods,
    };
    if instrumented == 0 {
        Ok(LoadOutcome::Unchanged(unit))
    } else {
        info!(
            class = %unit.class_name,
            instrumented,
            "Code unit rewritten"
        );
        Ok(LoadOutcome::Rewritten(unit))
    }
}

/// Instrument one method body.
///
/// Layout of the result:
///
/// ```text
/// Probe(Enter)            not covered by the catch-all
/// Label(start)
///   ...original stream, Probe(Exit) spliced before every Return...
/// Label(end)
/// Label(catch)            the appended trailer
/// Probe(Exception)        peeks the in-flight exception
/// Throw                   re-raises the identical object
/// ```
///
/// The catch-all handler entry `[start, end) -> catch` is appended after the
/// original handlers, so any handler the method already had keeps priority;
/// only exceptions nothing else catches reach the trailer. The trailer's
/// `Throw` sits outside the protected range, so the re-raise propagates to
/// the caller instead of looping.
fn rewrite_body(body: MethodBody, capture: bool) -> MethodBody {
    let next = body.max_label().map_or(0, |max| max + 1);
    let (start, end, catch) = (Label(next), Label(next + 1), Label(next + 2));

    let mut instrs = Vec::with_capacity(body.instrs.len() + 6);
    instrs.push(Instr::Probe(ProbeKind::Enter { capture }));
    instrs.push(Instr::Label(start));
    for instr in body.instrs {
        if matches!(instr, Instr::Return) {
            instrs.push(Instr::Probe(ProbeKind::Exit));
        }
        instrs.push(instr);
    }
    instrs.push(Instr::Label(end));
    instrs.push(Instr::Label(catch));
    instrs.push(Instr::Probe(ProbeKind::Exception));
    instrs.push(Instr::Throw);

    let mut handlers = body.handlers;
    handlers.push(HandlerEntry {
        from: start,
        to: end,
        target: catch,
    });

    MethodBody {
        instrs,
        handlers,
        max_locals: body.max_locals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{BinOp, Const};
    use crate::unit::MethodFlags;
    use calltrace_select::{SelectionSet, parse_rules};

    fn selection(rules: &str) -> SelectionSet {
        SelectionSet::from_rules(parse_rules(rules).unwrap())
    }

    fn add_method() -> Method {
        Method {
            name: "add".to_string(),
            descriptor: "(i32,i32)i32".to_string(),
            flags: MethodFlags {
                is_static: true,
                ..MethodFlags::default()
            },
            body: MethodBody {
                instrs: vec![
                    Instr::LoadLocal(0),
                    Instr::LoadLocal(1),
                    Instr::BinOp(BinOp::Add),
                    Instr::Return,
                ],
                handlers: Vec::new(),
                max_locals: 2,
            },
        }
    }

    fn unit_with(methods: Vec<Method>) -> CodeUnit {
        CodeUnit {
            class_name: "demo.Calc".to_string(),
            methods,
        }
    }

    #[test]
    fn test_non_selected_method_is_identical() {
        let original = unit_with(vec![add_method()]);
        let outcome = rewrite_unit(original.clone(), &selection("other.Class.*(*)")).unwrap();
        assert!(!outcome.is_rewritten());
        assert_eq!(outcome.unit(), &original);
    }

    #[test]
    fn test_entry_probe_is_first_instruction() {
        let outcome = rewrite_unit(unit_with(vec![add_method()]), &selection("*.*(*)")).unwrap();
        assert!(outcome.is_rewritten());
        let body = &outcome.unit().method("add").unwrap().body;
        assert_eq!(
            body.instrs[0],
            Instr::Probe(ProbeKind::Enter { capture: false })
        );
    }

    #[test]
    fn test_exit_probe_before_every_return() {
        let method = Method {
            name: "pick".to_string(),
            descriptor: "(bool)i32".to_string(),
            flags: MethodFlags {
                is_static: true,
                ..MethodFlags::default()
            },
            body: MethodBody {
                instrs: vec![
                    Instr::LoadLocal(0),
                    Instr::BranchIfFalse(Label(0)),
                    Instr::Push(Const::I32(1)),
                    Instr::Return,
                    Instr::Label(Label(0)),
                    Instr::Push(Const::I32(2)),
                    Instr::Return,
                ],
                handlers: Vec::new(),
                max_locals: 1,
            },
        };
        let outcome = rewrite_unit(unit_with(vec![method]), &selection("*.*(*)")).unwrap();
        let body = &outcome.unit().method("pick").unwrap().body;
        let mut returns = 0;
        for (index, instr) in body.instrs.iter().enumerate() {
            if *instr == Instr::Return && index + 1 != body.instrs.len() {
                returns += 1;
                assert_eq!(body.instrs[index - 1], Instr::Probe(ProbeKind::Exit));
            }
        }
        assert_eq!(returns, 2);
        // Existing jump targets survive untouched.
        assert!(body.instrs.contains(&Instr::BranchIfFalse(Label(0))));
        assert!(body.instrs.contains(&Instr::Label(Label(0))));
    }

    #[test]
    fn test_catch_all_handler_appended_last() {
        let outcome = rewrite_unit(unit_with(vec![add_method()]), &selection("*.*(*)")).unwrap();
        let body = &outcome.unit().method("add").unwrap().body;
        assert_eq!(body.handlers.len(), 1);
        let tail: Vec<&Instr> = body.instrs.iter().rev().take(2).collect();
        assert_eq!(*tail[0], Instr::Throw);
        assert_eq!(*tail[1], Instr::Probe(ProbeKind::Exception));
    }

    #[test]
    fn test_capture_mode_flows_into_entry_probe() {
        let outcome = rewrite_unit(unit_with(vec![add_method()]), &selection("*.*(*+)")).unwrap();
        let body = &outcome.unit().method("add").unwrap().body;
        assert_eq!(
            body.instrs[0],
            Instr::Probe(ProbeKind::Enter { capture: true })
        );
    }

    #[test]
    fn test_constructors_and_synthetic_methods_are_skipped() {
        let mut ctor = add_method();
        ctor.name = "init".to_string();
        ctor.flags.is_constructor = true;
        let mut synthetic = add_method();
        synthetic.name = "lambda0".to_string();
        synthetic.flags.is_synthetic = true;
        let mut utility = add_method();
        utility.name = "toString".to_string();
        utility.descriptor = "()string".to_string();
        utility.body = MethodBody {
            instrs: vec![
                Instr::Push(Const::Obj {
                    type_name: "string".to_string(),
                    text: "Calc".to_string(),
                }),
                Instr::Return,
            ],
            handlers: Vec::new(),
            max_locals: 0,
        };

        let original = unit_with(vec![ctor, synthetic, utility]);
        let outcome = rewrite_unit(original.clone(), &selection("*.*(*)")).unwrap();
        assert!(!outcome.is_rewritten());
        assert_eq!(outcome.unit(), &original);
    }

    #[test]
    fn test_bad_descriptor_fails_whole_unit() {
        let mut broken = add_method();
        broken.name = "bad".to_string();
        broken.descriptor = "(i32".to_string();
        let unit = unit_with(vec![add_method(), broken]);
        let err = rewrite_unit(unit, &selection("*.*(*)")).unwrap_err();
        match err {
            RewriteError::BadSignature { method_name, .. } => assert_eq!(method_name, "bad"),
        }
    }

    #[test]
    fn test_fresh_labels_do_not_collide() {
        let method = Method {
            name: "looped".to_string(),
            descriptor: "()void".to_string(),
            flags: MethodFlags {
                is_static: true,
                ..MethodFlags::default()
            },
            body: MethodBody {
                instrs: vec![
                    Instr::Label(Label(5)),
                    Instr::Push(Const::Bool(false)),
                    Instr::BranchIfFalse(Label(9)),
                    Instr::Jump(Label(5)),
                    Instr::Label(Label(9)),
                    Instr::Return,
                ],
                handlers: Vec::new(),
                max_locals: 0,
            },
        };
        let outcome = rewrite_unit(unit_with(vec![method]), &selection("*.*(*)")).unwrap();
        let body = &outcome.unit().method("looped").unwrap().body;
        let handler = body.handlers.last().unwrap();
        assert!(handler.from.0 > 9 && handler.to.0 > 9 && handler.target.0 > 9);
    }
}
