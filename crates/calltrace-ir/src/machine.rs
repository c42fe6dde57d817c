//! A small stack interpreter for code units.
//!
//! The machine executes original and rewritten bodies alike; probes are the
//! only instrumentation-aware instructions, and they emit events through an
//! [`EventSink`] without touching the operand stack or locals. Guest
//! exceptions unwind through the handler tables and surface as an
//! [`Outcome`]; malformed code surfaces as a [`MachineError`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use calltrace_event::{Event, EventSink, Value, now_ms};
use calltrace_select::{MethodSignature, ReturnKind, TypeKind};

use crate::error::{MachineError, MachineResult};
use crate::instr::{BinOp, Const, Instr, ProbeKind};
use crate::unit::{CodeUnit, MethodFlags};

/// Heap data of a reference value. Shared by `Arc` so duplication and
/// rethrow preserve object identity.
#[derive(Debug, PartialEq, Eq)]
pub struct ObjectData {
    /// Qualified type name.
    pub type_name: String,
    /// Text rendering of the object.
    pub text: String,
}

/// A runtime value on the operand stack or in a local slot.
#[derive(Debug, Clone)]
pub enum RtValue {
    /// Boolean.
    Bool(bool),
    /// Character.
    Char(char),
    /// 8-bit integer.
    I8(i8),
    /// 16-bit integer.
    I16(i16),
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Reference to a heap object.
    Obj(Arc<ObjectData>),
}

impl RtValue {
    /// A fresh reference value.
    pub fn object(type_name: impl Into<String>, text: impl Into<String>) -> Self {
        RtValue::Obj(Arc::new(ObjectData {
            type_name: type_name.into(),
            text: text.into(),
        }))
    }

    /// Box this value for an event, preserving the exact kind for
    /// primitives and falling back to a type-plus-text capture for
    /// references.
    pub fn to_value(&self) -> Value {
        match self {
            RtValue::Bool(v) => Value::Bool(*v),
            RtValue::Char(v) => Value::Char(*v),
            RtValue::I8(v) => Value::I8(*v),
            RtValue::I16(v) => Value::I16(*v),
            RtValue::I32(v) => Value::I32(*v),
            RtValue::I64(v) => Value::I64(*v),
            RtValue::F32(v) => Value::F32(*v),
            RtValue::F64(v) => Value::F64(*v),
            RtValue::Obj(data) => Value::object(&data.type_name, &data.text),
        }
    }

    /// Short name of this value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            RtValue::Bool(_) => "bool",
            RtValue::Char(_) => "char",
            RtValue::I8(_) => "i8",
            RtValue::I16(_) => "i16",
            RtValue::I32(_) => "i32",
            RtValue::I64(_) => "i64",
            RtValue::F32(_) => "f32",
            RtValue::F64(_) => "f64",
            RtValue::Obj(_) => "reference",
        }
    }

    fn matches_kind(&self, kind: &TypeKind) -> bool {
        matches!(
            (self, kind),
            (RtValue::Bool(_), TypeKind::Bool)
                | (RtValue::Char(_), TypeKind::Char)
                | (RtValue::I8(_), TypeKind::I8)
                | (RtValue::I16(_), TypeKind::I16)
                | (RtValue::I32(_), TypeKind::I32)
                | (RtValue::I64(_), TypeKind::I64)
                | (RtValue::F32(_), TypeKind::F32)
                | (RtValue::F64(_), TypeKind::F64)
                | (RtValue::Obj(_), TypeKind::Ref(_))
        )
    }
}

impl From<&Const> for RtValue {
    fn from(constant: &Const) -> Self {
        match constant {
            Const::Bool(v) => RtValue::Bool(*v),
            Const::Char(v) => RtValue::Char(*v),
            Const::I8(v) => RtValue::I8(*v),
            Const::I16(v) => RtValue::I16(*v),
            Const::I32(v) => RtValue::I32(*v),
            Const::I64(v) => RtValue::I64(*v),
            Const::F32(v) => RtValue::F32(*v),
            Const::F64(v) => RtValue::F64(*v),
            Const::Obj { type_name, text } => RtValue::object(type_name, text),
        }
    }
}

/// How a call to the machine ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The entry method returned, with its value for non-void methods.
    Returned(Option<RtValue>),
    /// An exception propagated out of the entry method.
    Threw(Arc<ObjectData>),
}

impl Outcome {
    /// The returned value, if the call returned one.
    pub fn returned(&self) -> Option<&RtValue> {
        match self {
            Outcome::Returned(value) => value.as_ref(),
            Outcome::Threw(_) => None,
        }
    }

    /// Whether the call ended with an uncaught exception.
    pub fn is_thrown(&self) -> bool {
        matches!(self, Outcome::Threw(_))
    }
}

/// Where a raised exception went.
enum Unwound {
    /// A handler covers the site; execution resumes at this index.
    Handled(usize),
    /// Nothing covers the site; the exception escapes the method.
    Escaped(Arc<ObjectData>),
}

/// A handler range resolved to instruction indices.
struct ResolvedHandler {
    from: usize,
    to: usize,
    target: usize,
}

/// A method with labels resolved and its signature parsed, ready to run.
struct PreparedMethod {
    signature: MethodSignature,
    flags: MethodFlags,
    instrs: Vec<Instr>,
    handlers: Vec<ResolvedHandler>,
    labels: HashMap<u32, usize>,
    max_locals: u16,
}

impl PreparedMethod {
    /// Argument count a call must supply: declared parameters, plus the
    /// receiver for instance methods.
    fn arg_count(&self) -> usize {
        self.signature.params.len() + usize::from(!self.flags.is_static)
    }
}

/// A loaded unit: its methods, prepared.
struct PreparedUnit {
    methods: HashMap<String, PreparedMethod>,
}

/// The interpreter: a set of loaded units and the sink probes emit into.
pub struct Machine {
    units: HashMap<String, PreparedUnit>,
    sink: Arc<dyn EventSink>,
}

impl Machine {
    /// A machine whose probes emit into `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            units: HashMap::new(),
            sink,
        }
    }

    /// Load a unit, parsing every signature and resolving every label.
    ///
    /// # Errors
    ///
    /// Fails when a descriptor does not parse or a jump or handler names a
    /// label the body never defines. A failed load leaves the machine
    /// unchanged.
    pub fn load_unit(&mut self, unit: CodeUnit) -> MachineResult<()> {
        let class_name = unit.class_name;
        let mut methods = HashMap::with_capacity(unit.methods.len());
        for method in unit.methods {
            let signature =
                MethodSignature::parse_descriptor(&class_name, &method.name, &method.descriptor)
                    .map_err(|source| MachineError::BadSignature {
                        class_name: class_name.clone(),
                        method_name: method.name.clone(),
                        source,
                    })?;

            let mut labels = HashMap::new();
            for (index, instr) in method.body.instrs.iter().enumerate() {
                if let Instr::Label(label) = instr {
                    labels.insert(label.0, index);
                }
            }
            let resolve = |label: u32| {
                labels
                    .get(&label)
                    .copied()
                    .ok_or_else(|| MachineError::UndefinedLabel {
                        class_name: class_name.clone(),
                        method_name: method.name.clone(),
                        label,
                    })
            };
            for instr in &method.body.instrs {
                if let Instr::Jump(label) | Instr::BranchIfFalse(label) = instr {
                    resolve(label.0)?;
                }
            }
            let mut handlers = Vec::with_capacity(method.body.handlers.len());
            for entry in &method.body.handlers {
                handlers.push(ResolvedHandler {
                    from: resolve(entry.from.0)?,
                    to: resolve(entry.to.0)?,
                    target: resolve(entry.target.0)?,
                });
            }

            methods.insert(
                method.name,
                PreparedMethod {
                    signature,
                    flags: method.flags,
                    instrs: method.body.instrs,
                    handlers,
                    labels,
                    max_locals: method.body.max_locals,
                },
            );
        }
        debug!(class = %class_name, methods = methods.len(), "Code unit loaded");
        self.units.insert(class_name, PreparedUnit { methods });
        Ok(())
    }

    /// Call a loaded method.
    ///
    /// For instance methods `args[0]` is the receiver. The outcome is how
    /// the guest call ended; an uncaught guest exception is an
    /// [`Outcome::Threw`], not an error.
    ///
    /// # Errors
    ///
    /// Fails when the method does not exist, the argument count is wrong,
    /// or the body is malformed.
    pub fn call(
        &self,
        class_name: &str,
        method_name: &str,
        args: &[RtValue],
    ) -> MachineResult<Outcome> {
        let method = self.lookup(class_name, method_name)?;
        if args.len() != method.arg_count() {
            return Err(MachineError::ArityMismatch {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
                expected: method.arg_count(),
                actual: args.len(),
            });
        }
        self.exec(method, args.to_vec())
    }

    fn lookup(&self, class_name: &str, method_name: &str) -> MachineResult<&PreparedMethod> {
        let unit = self
            .units
            .get(class_name)
            .ok_or_else(|| MachineError::UnknownUnit {
                class_name: class_name.to_string(),
            })?;
        unit.methods
            .get(method_name)
            .ok_or_else(|| MachineError::UnknownMethod {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
            })
    }

    fn exec(&self, method: &PreparedMethod, args: Vec<RtValue>) -> MachineResult<Outcome> {
        let class_name = &method.signature.class_name;
        let method_name = &method.signature.method_name;

        let slots = usize::from(method.max_locals).max(args.len());
        let mut locals: Vec<Option<RtValue>> = vec![None; slots];
        for (slot, arg) in args.into_iter().enumerate() {
            locals[slot] = Some(arg);
        }
        let mut stack: Vec<RtValue> = Vec::new();
        let mut pc = 0usize;

        let underflow = |pc: usize| MachineError::StackUnderflow {
            class_name: class_name.clone(),
            method_name: method_name.clone(),
            pc,
        };
        let mismatch = |pc: usize, detail: String| MachineError::TypeMismatch {
            class_name: class_name.clone(),
            method_name: method_name.clone(),
            pc,
            detail,
        };

        while pc < method.instrs.len() {
            match &method.instrs[pc] {
                Instr::Label(_) => {}
                Instr::Push(constant) => stack.push(RtValue::from(constant)),
                Instr::LoadLocal(slot) => {
                    let value = locals
                        .get(usize::from(*slot))
                        .and_then(|v| v.clone())
                        .ok_or(MachineError::UninitializedLocal {
                            class_name: class_name.clone(),
                            method_name: method_name.clone(),
                            pc,
                            slot: *slot,
                        })?;
                    stack.push(value);
                }
                Instr::StoreLocal(slot) => {
                    let value = stack.pop().ok_or_else(|| underflow(pc))?;
                    let slot = usize::from(*slot);
                    if slot >= locals.len() {
                        locals.resize(slot + 1, None);
                    }
                    locals[slot] = Some(value);
                }
                Instr::Dup => {
                    let top = stack.last().cloned().ok_or_else(|| underflow(pc))?;
                    stack.push(top);
                }
                Instr::Pop => {
                    stack.pop().ok_or_else(|| underflow(pc))?;
                }
                Instr::BinOp(op) => {
                    let rhs = stack.pop().ok_or_else(|| underflow(pc))?;
                    let lhs = stack.pop().ok_or_else(|| underflow(pc))?;
                    stack.push(apply_binop(*op, lhs, rhs).map_err(|detail| mismatch(pc, detail))?);
                }
                Instr::Jump(label) => {
                    pc = method.resolve_label(label.0)?;
                    continue;
                }
                Instr::BranchIfFalse(label) => {
                    let RtValue::Bool(condition) = stack.pop().ok_or_else(|| underflow(pc))?
                    else {
                        return Err(mismatch(pc, "branch condition must be a bool".to_string()));
                    };
                    if !condition {
                        pc = method.resolve_label(label.0)?;
                        continue;
                    }
                }
                Instr::Call {
                    class_name: callee_class,
                    method_name: callee_method,
                } => {
                    let callee = self.lookup(callee_class, callee_method)?;
                    let count = callee.arg_count();
                    if stack.len() < count {
                        return Err(underflow(pc));
                    }
                    let call_args = stack.split_off(stack.len() - count);
                    match self.exec(callee, call_args)? {
                        Outcome::Returned(Some(value)) => stack.push(value),
                        Outcome::Returned(None) => {}
                        Outcome::Threw(exception) => {
                            match unwind(method, &mut stack, pc, exception) {
                                Unwound::Handled(target) => {
                                    pc = target;
                                    continue;
                                }
                                Unwound::Escaped(exception) => {
                                    return Ok(Outcome::Threw(exception));
                                }
                            }
                        }
                    }
                }
                Instr::Return => {
                    return match method.signature.ret.value_kind() {
                        Some(kind) => {
                            let value = stack.pop().ok_or_else(|| underflow(pc))?;
                            if !value.matches_kind(kind) {
                                return Err(mismatch(
                                    pc,
                                    format!("returning {} from a {kind} method", value.kind_name()),
                                ));
                            }
                            Ok(Outcome::Returned(Some(value)))
                        }
                        None => Ok(Outcome::Returned(None)),
                    };
                }
                Instr::Throw => {
                    let RtValue::Obj(exception) = stack.pop().ok_or_else(|| underflow(pc))?
                    else {
                        return Err(mismatch(pc, "throw needs a reference".to_string()));
                    };
                    match unwind(method, &mut stack, pc, exception) {
                        Unwound::Handled(target) => {
                            pc = target;
                            continue;
                        }
                        Unwound::Escaped(exception) => {
                            return Ok(Outcome::Threw(exception));
                        }
                    }
                }
                Instr::Probe(kind) => {
                    self.emit_probe(method, *kind, &locals, &stack)
                        .map_err(|detail| mismatch(pc, detail))?;
                }
            }
            pc += 1;
        }

        Err(MachineError::MissingReturn {
            class_name: class_name.clone(),
            method_name: method_name.clone(),
        })
    }

    fn emit_probe(
        &self,
        method: &PreparedMethod,
        kind: ProbeKind,
        locals: &[Option<RtValue>],
        stack: &[RtValue],
    ) -> Result<(), String> {
        let thread_id = thread_id::get() as i64;
        let time_ms = now_ms();
        let event = match kind {
            ProbeKind::Enter { capture } => {
                let parameters = if capture {
                    let mut boxed = Vec::with_capacity(method.arg_count());
                    for slot in 0..method.arg_count() {
                        let value = locals
                            .get(slot)
                            .and_then(|v| v.as_ref())
                            .ok_or_else(|| format!("argument slot {slot} is empty"))?;
                        boxed.push(value.to_value());
                    }
                    Some(boxed)
                } else if method.flags.is_static {
                    None
                } else {
                    let receiver = locals
                        .first()
                        .and_then(|v| v.as_ref())
                        .ok_or_else(|| "receiver slot is empty".to_string())?;
                    Some(vec![receiver.to_value()])
                };
                Event::Enter {
                    thread_id,
                    time_ms,
                    class_name: method.signature.class_name.clone(),
                    method_name: method.signature.method_name.clone(),
                    is_static: method.flags.is_static,
                    parameters,
                }
            }
            ProbeKind::Exit => {
                let return_value = match method.signature.ret {
                    ReturnKind::Void => None,
                    ReturnKind::Value(_) => Some(
                        stack
                            .last()
                            .ok_or_else(|| "no return value to record".to_string())?
                            .to_value(),
                    ),
                };
                Event::Exit {
                    thread_id,
                    time_ms,
                    return_value,
                }
            }
            ProbeKind::Exception => {
                let thrown = stack
                    .last()
                    .ok_or_else(|| "no in-flight exception to record".to_string())?;
                Event::Exception {
                    thread_id,
                    time_ms,
                    thrown: thrown.to_value(),
                }
            }
        };
        self.sink.emit(event);
        Ok(())
    }
}

impl PreparedMethod {
    // Labels are validated at load time; a miss here would mean the body
    // changed after loading, which ownership prevents.
    fn resolve_label(&self, label: u32) -> MachineResult<usize> {
        self.labels
            .get(&label)
            .copied()
            .ok_or(MachineError::UndefinedLabel {
                class_name: self.signature.class_name.clone(),
                method_name: self.signature.method_name.clone(),
                label,
            })
    }
}

/// Raise `exception` at `pc`. Handlers are searched in table order; the
/// first entry covering the site wins, the operand stack is cleared, and
/// the exception becomes the only operand at the handler's entry point.
fn unwind(
    method: &PreparedMethod,
    stack: &mut Vec<RtValue>,
    pc: usize,
    exception: Arc<ObjectData>,
) -> Unwound {
    match method.handlers.iter().find(|h| h.from <= pc && pc < h.to) {
        Some(handler) => {
            stack.clear();
            stack.push(RtValue::Obj(exception));
            Unwound::Handled(handler.target)
        }
        None => Unwound::Escaped(exception),
    }
}

fn apply_binop(op: BinOp, lhs: RtValue, rhs: RtValue) -> Result<RtValue, String> {
    use RtValue::*;
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul => {
            let arith = |a: i64, b: i64| match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                _ => a.wrapping_mul(b),
            };
            match (lhs, rhs) {
                (I8(a), I8(b)) => Ok(I8(arith(a.into(), b.into()) as i8)),
                (I16(a), I16(b)) => Ok(I16(arith(a.into(), b.into()) as i16)),
                (I32(a), I32(b)) => Ok(I32(arith(a.into(), b.into()) as i32)),
                (I64(a), I64(b)) => Ok(I64(arith(a, b))),
                (lhs, rhs) => Err(format!(
                    "arithmetic needs matching integers, got {} and {}",
                    lhs.kind_name(),
                    rhs.kind_name()
                )),
            }
        }
        BinOp::Eq => {
            let equal = match (&lhs, &rhs) {
                (Bool(a), Bool(b)) => a == b,
                (Char(a), Char(b)) => a == b,
                (I8(a), I8(b)) => a == b,
                (I16(a), I16(b)) => a == b,
                (I32(a), I32(b)) => a == b,
                (I64(a), I64(b)) => a == b,
                (F32(a), F32(b)) => a == b,
                (F64(a), F64(b)) => a == b,
                (Obj(a), Obj(b)) => Arc::ptr_eq(a, b),
                _ => {
                    return Err(format!(
                        "equality needs matching kinds, got {} and {}",
                        lhs.kind_name(),
                        rhs.kind_name()
                    ));
                }
            };
            Ok(Bool(equal))
        }
        BinOp::Lt => match (lhs, rhs) {
            (I8(a), I8(b)) => Ok(Bool(a < b)),
            (I16(a), I16(b)) => Ok(Bool(a < b)),
            (I32(a), I32(b)) => Ok(Bool(a < b)),
            (I64(a), I64(b)) => Ok(Bool(a < b)),
            (lhs, rhs) => Err(format!(
                "comparison needs matching integers, got {} and {}",
                lhs.kind_name(),
                rhs.kind_name()
            )),
        },
    }
}
