//! Error types for rewriting and execution.

use thiserror::Error;

use calltrace_select::ParseError;

/// Errors from the load-time rewriting pass.
///
/// Any failure aborts the whole code unit: the loader receives the original
/// unit untouched rather than a partially instrumented one.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// A method descriptor could not be parsed into parameter/return kinds.
    #[error("Cannot parse signature of {class_name}.{method_name}: {source}")]
    BadSignature {
        /// Class of the offending method.
        class_name: String,
        /// Name of the offending method.
        method_name: String,
        /// The underlying descriptor parse failure.
        #[source]
        source: ParseError,
    },
}

/// Result type for rewriting.
pub type RewriteResult<T> = std::result::Result<T, RewriteError>;

/// Errors from the interpreter, distinct from guest exceptions.
///
/// A guest exception propagating out of the entry method is a normal
/// [`Outcome`](crate::machine::Outcome); these errors mean the code itself
/// is malformed or a host-side invariant broke.
#[derive(Debug, Error)]
pub enum MachineError {
    /// No loaded unit with this class name.
    #[error("Unknown code unit: {class_name}")]
    UnknownUnit {
        /// The missing class.
        class_name: String,
    },

    /// The unit has no method with this name.
    #[error("Unknown method: {class_name}.{method_name}")]
    UnknownMethod {
        /// Class searched.
        class_name: String,
        /// Missing method.
        method_name: String,
    },

    /// A jump or handler referenced a label the body never defines.
    #[error("Undefined label {label} in {class_name}.{method_name}")]
    UndefinedLabel {
        /// Class of the offending method.
        class_name: String,
        /// Offending method.
        method_name: String,
        /// The missing label number.
        label: u32,
    },

    /// A method descriptor could not be parsed at load time.
    #[error("Cannot parse signature of {class_name}.{method_name}: {source}")]
    BadSignature {
        /// Class of the offending method.
        class_name: String,
        /// Offending method.
        method_name: String,
        /// The underlying descriptor parse failure.
        #[source]
        source: ParseError,
    },

    /// A call supplied the wrong number of arguments.
    #[error("{class_name}.{method_name} takes {expected} argument(s), got {actual}")]
    ArityMismatch {
        /// Callee class.
        class_name: String,
        /// Callee method.
        method_name: String,
        /// Expected argument count (receiver included for instance methods).
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },

    /// An instruction needed more operands than the stack holds.
    #[error("Operand stack underflow at {class_name}.{method_name}:{pc}")]
    StackUnderflow {
        /// Executing class.
        class_name: String,
        /// Executing method.
        method_name: String,
        /// Instruction index.
        pc: usize,
    },

    /// An operand had the wrong kind for the instruction or signature.
    #[error("Type mismatch at {class_name}.{method_name}:{pc}: {detail}")]
    TypeMismatch {
        /// Executing class.
        class_name: String,
        /// Executing method.
        method_name: String,
        /// Instruction index.
        pc: usize,
        /// What was expected versus found.
        detail: String,
    },

    /// A load from a local slot that was never written.
    #[error("Read of uninitialized local {slot} at {class_name}.{method_name}:{pc}")]
    UninitializedLocal {
        /// Executing class.
        class_name: String,
        /// Executing method.
        method_name: String,
        /// Instruction index.
        pc: usize,
        /// The unwritten slot.
        slot: u16,
    },

    /// Execution ran past the end of the body without returning.
    #[error("Fell off the end of {class_name}.{method_name}")]
    MissingReturn {
        /// Executing class.
        class_name: String,
        /// Executing method.
        method_name: String,
    },
}

/// Result type for interpretation.
pub type MachineResult<T> = std::result::Result<T, MachineError>;
