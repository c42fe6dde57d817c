//! The stack-based instruction set.
//!
//! Method bodies are flat instruction streams over an operand stack and
//! numbered local slots. Control flow targets are [`Label`]s embedded in the
//! stream rather than raw indices, so a rewriting pass can insert
//! instructions without disturbing any jump or handler range.

use std::fmt;

/// A control-flow target inside one method body.
///
/// Labels are local to a body; the rewriter allocates fresh ones above the
/// body's current maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    /// Boolean literal.
    Bool(bool),
    /// Character literal.
    Char(char),
    /// 8-bit integer literal.
    I8(i8),
    /// 16-bit integer literal.
    I16(i16),
    /// 32-bit integer literal.
    I32(i32),
    /// 64-bit integer literal.
    I64(i64),
    /// 32-bit float literal.
    F32(f32),
    /// 64-bit float literal.
    F64(f64),
    /// Reference literal: a fresh object with a type name and a text
    /// rendering. Also how exception objects are created.
    Obj {
        /// Qualified type name.
        type_name: String,
        /// Text rendering of the object.
        text: String,
    },
}

/// Arithmetic and comparison over the top two stack operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// Integer addition (same-kind operands).
    Add,
    /// Integer subtraction.
    Sub,
    /// Integer multiplication.
    Mul,
    /// Equality; pushes a boolean.
    Eq,
    /// Less-than over integers; pushes a boolean.
    Lt,
}

/// Probe instructions inserted by the rewriter; never present in original
/// bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// Method entry. With `capture`, the receiver and all argument values
    /// are boxed into the event.
    Enter {
        /// Whether argument values are recorded.
        capture: bool,
    },
    /// Normal return; peeks the unconsumed return value.
    Exit,
    /// Exceptional exit; peeks the in-flight exception.
    Exception,
}

/// One instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// A control-flow target. Executes as a no-op.
    Label(Label),
    /// Push a literal.
    Push(Const),
    /// Push the value of a local slot.
    LoadLocal(u16),
    /// Pop into a local slot.
    StoreLocal(u16),
    /// Duplicate the top operand.
    Dup,
    /// Discard the top operand.
    Pop,
    /// Apply a binary operation to the top two operands.
    BinOp(BinOp),
    /// Unconditional jump.
    Jump(Label),
    /// Pop a boolean; jump when it is false.
    BranchIfFalse(Label),
    /// Call another method in the loaded units. Arguments (receiver first
    /// for instance methods) are popped; a non-void result is pushed.
    Call {
        /// Dot-qualified class name of the callee.
        class_name: String,
        /// Method name of the callee.
        method_name: String,
    },
    /// Return to the caller, popping the return value for non-void methods.
    Return,
    /// Pop a reference and raise it as an exception.
    Throw,
    /// Emit a trace event. Stack- and local-neutral.
    Probe(ProbeKind),
}

impl Instr {
    /// Whether this instruction ends a basic block without falling through.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instr::Jump(_) | Instr::Return | Instr::Throw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(Instr::Return.is_terminator());
        assert!(Instr::Throw.is_terminator());
        assert!(Instr::Jump(Label(0)).is_terminator());
        assert!(!Instr::Dup.is_terminator());
        assert!(!Instr::Probe(ProbeKind::Exit).is_terminator());
    }

    #[test]
    fn test_label_display() {
        assert_eq!(Label(3).to_string(), "L3");
    }
}
