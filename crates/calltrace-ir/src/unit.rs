//! Code units and method bodies.
//!
//! A [`CodeUnit`] is the load-time unit of transformation: one class worth
//! of methods. Methods carry a textual descriptor (parsed into a signature
//! by the rewriter and the interpreter), access flags, and a body.

use crate::instr::{Instr, Label};

/// One entry of a body's exception-handler table.
///
/// The range covers the instructions between the `from` and `to` labels
/// (inclusive of `from`'s position, exclusive of `to`'s). When an exception
/// is raised at a covered instruction, control transfers to `target` with
/// the exception as the only operand. Entries are searched in table order;
/// earlier entries win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEntry {
    /// Start of the protected range.
    pub from: Label,
    /// End of the protected range (exclusive).
    pub to: Label,
    /// Handler entry point.
    pub target: Label,
}

/// A method body: instruction stream, handler table, local-slot count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// The instruction stream.
    pub instrs: Vec<Instr>,
    /// Exception handlers, searched in order.
    pub handlers: Vec<HandlerEntry>,
    /// Number of local slots the body uses (arguments included).
    pub max_locals: u16,
}

impl MethodBody {
    /// The highest label number present in the stream or handler table,
    /// or `None` for a label-free body. The rewriter allocates fresh labels
    /// above this.
    pub fn max_label(&self) -> Option<u32> {
        let stream = self.instrs.iter().filter_map(|instr| match instr {
            Instr::Label(label) | Instr::Jump(label) | Instr::BranchIfFalse(label) => {
                Some(label.0)
            }
            _ => None,
        });
        let table = self
            .handlers
            .iter()
            .flat_map(|h| [h.from.0, h.to.0, h.target.0]);
        stream.chain(table).max()
    }
}

/// Access flags of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodFlags {
    /// Static method: no receiver slot.
    pub is_static: bool,
    /// Compiler-synthesized method; never instrumented.
    pub is_synthetic: bool,
    /// Constructor; never instrumented.
    pub is_constructor: bool,
}

/// One method of a code unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    /// Plain method name.
    pub name: String,
    /// Textual descriptor, e.g. `(i32,i64)i64`.
    pub descriptor: String,
    /// Access flags.
    pub flags: MethodFlags,
    /// The body.
    pub body: MethodBody,
}

/// One class worth of methods; the unit of load-time transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    /// Dot-qualified class name.
    pub class_name: String,
    /// The methods, in declaration order.
    pub methods: Vec<Method>,
}

impl CodeUnit {
    /// Create an empty unit.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            methods: Vec::new(),
        }
    }

    /// Add a method, builder style.
    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{Const, Instr, Label};

    #[test]
    fn test_max_label() {
        let body = MethodBody {
            instrs: vec![
                Instr::Label(Label(0)),
                Instr::Push(Const::I32(1)),
                Instr::Jump(Label(4)),
                Instr::Label(Label(4)),
                Instr::Return,
            ],
            handlers: vec![HandlerEntry {
                from: Label(0),
                to: Label(4),
                target: Label(7),
            }],
            max_locals: 0,
        };
        assert_eq!(body.max_label(), Some(7));
        assert_eq!(MethodBody::default().max_label(), None);
    }

    #[test]
    fn test_method_lookup() {
        let unit = CodeUnit::new("demo.Calc").with_method(Method {
            name: "add".to_string(),
            descriptor: "(i32,i32)i32".to_string(),
            flags: MethodFlags::default(),
            body: MethodBody::default(),
        });
        assert!(unit.method("add").is_some());
        assert!(unit.method("sub").is_none());
    }
}
