//! Type kinds and method signatures.
//!
//! A method is identified for matching and boxing purposes by its
//! [`MethodSignature`]: the qualified class name, the method name, the
//! ordered parameter kinds, and the return kind. Kinds are the static type
//! classification used by the probe boxing rules: one of the eight primitive
//! kinds or a named reference type.

use std::fmt;

use crate::error::{ParseError, ParseResult};

/// Static type classification of a parameter or return value.
///
/// Distinct bit widths are distinct kinds: an `I16` and an `I64` never
/// collapse to the same boxed representation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeKind {
    /// Boolean.
    Bool,
    /// Unicode scalar value.
    Char,
    /// 8-bit signed integer.
    I8,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Reference type, matched by its qualified name.
    Ref(String),
}

impl TypeKind {
    /// Parse a single type token (`i32`, `bool`, a dotted reference name...).
    pub fn parse_token(token: &str) -> ParseResult<Self> {
        match token {
            "bool" => Ok(TypeKind::Bool),
            "char" => Ok(TypeKind::Char),
            "i8" => Ok(TypeKind::I8),
            "i16" => Ok(TypeKind::I16),
            "i32" => Ok(TypeKind::I32),
            "i64" => Ok(TypeKind::I64),
            "f32" => Ok(TypeKind::F32),
            "f64" => Ok(TypeKind::F64),
            other => {
                if is_reference_name(other) {
                    Ok(TypeKind::Ref(other.to_string()))
                } else {
                    Err(ParseError::BadParameterToken {
                        token: other.to_string(),
                    })
                }
            }
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Bool => write!(f, "bool"),
            TypeKind::Char => write!(f, "char"),
            TypeKind::I8 => write!(f, "i8"),
            TypeKind::I16 => write!(f, "i16"),
            TypeKind::I32 => write!(f, "i32"),
            TypeKind::I64 => write!(f, "i64"),
            TypeKind::F32 => write!(f, "f32"),
            TypeKind::F64 => write!(f, "f64"),
            TypeKind::Ref(name) => write!(f, "{}", name),
        }
    }
}

/// Return classification: a value kind or `void`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// The method returns nothing.
    Void,
    /// The method returns a value of the given kind.
    Value(TypeKind),
}

impl ReturnKind {
    /// The value kind, if the method returns one.
    pub fn value_kind(&self) -> Option<&TypeKind> {
        match self {
            ReturnKind::Void => None,
            ReturnKind::Value(kind) => Some(kind),
        }
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnKind::Void => write!(f, "void"),
            ReturnKind::Value(kind) => write!(f, "{}", kind),
        }
    }
}

/// The matching and boxing key for a method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Dot-qualified class name, e.g. `demo.math.Calculator`.
    pub class_name: String,
    /// Plain method name.
    pub method_name: String,
    /// Ordered parameter kinds.
    pub params: Vec<TypeKind>,
    /// Return kind.
    pub ret: ReturnKind,
}

impl MethodSignature {
    /// Build a signature from a textual descriptor of the form
    /// `(tok,tok,...)ret`, e.g. `(i32,demo.Name)bool` or `()void`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::BadDescriptor`] if the descriptor cannot be
    /// parsed into parameter and return kinds. Callers treat this as fatal
    /// for the enclosing code unit; there is no best-effort parse.
    pub fn parse_descriptor(
        class_name: &str,
        method_name: &str,
        descriptor: &str,
    ) -> ParseResult<Self> {
        let bad = |reason: &str| ParseError::BadDescriptor {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let rest = descriptor
            .strip_prefix('(')
            .ok_or_else(|| bad("expected leading '('"))?;
        let close = rest.find(')').ok_or_else(|| bad("missing ')'"))?;
        let (param_part, ret_part) = rest.split_at(close);
        let ret_part = &ret_part[1..];

        let mut params = Vec::new();
        if !param_part.trim().is_empty() {
            for token in param_part.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    return Err(bad("empty parameter token"));
                }
                params.push(TypeKind::parse_token(token)?);
            }
        }

        let ret = match ret_part.trim() {
            "" => return Err(bad("missing return kind")),
            "void" => ReturnKind::Void,
            token => ReturnKind::Value(TypeKind::parse_token(token)?),
        };

        Ok(Self {
            class_name: class_name.to_string(),
            method_name: method_name.to_string(),
            params,
            ret,
        })
    }

    /// Render the parameter/return part back into descriptor form.
    pub fn descriptor(&self) -> String {
        let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
        format!("({}){}", params.join(","), self.ret)
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{}",
            self.class_name,
            self.method_name,
            self.descriptor()
        )
    }
}

/// A reference-type name: non-empty dot-separated identifier segments.
fn is_reference_name(token: &str) -> bool {
    !token.is_empty()
        && token.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitive_tokens() {
        assert_eq!(TypeKind::parse_token("i32").unwrap(), TypeKind::I32);
        assert_eq!(TypeKind::parse_token("bool").unwrap(), TypeKind::Bool);
        assert_eq!(TypeKind::parse_token("f64").unwrap(), TypeKind::F64);
    }

    #[test]
    fn test_parse_reference_token() {
        assert_eq!(
            TypeKind::parse_token("demo.util.Name").unwrap(),
            TypeKind::Ref("demo.util.Name".to_string())
        );
    }

    #[test]
    fn test_reject_bad_token() {
        assert!(TypeKind::parse_token("i32[]").is_err());
        assert!(TypeKind::parse_token("").is_err());
        assert!(TypeKind::parse_token("a..b").is_err());
    }

    #[test]
    fn test_parse_descriptor() {
        let sig = MethodSignature::parse_descriptor("demo.Calc", "add", "(i32,i64)i64").unwrap();
        assert_eq!(sig.params, vec![TypeKind::I32, TypeKind::I64]);
        assert_eq!(sig.ret, ReturnKind::Value(TypeKind::I64));
        assert_eq!(sig.descriptor(), "(i32,i64)i64");
    }

    #[test]
    fn test_parse_void_descriptor() {
        let sig = MethodSignature::parse_descriptor("demo.Calc", "reset", "()void").unwrap();
        assert!(sig.params.is_empty());
        assert_eq!(sig.ret, ReturnKind::Void);
    }

    #[test]
    fn test_descriptor_errors() {
        assert!(MethodSignature::parse_descriptor("C", "m", "i32)i32").is_err());
        assert!(MethodSignature::parse_descriptor("C", "m", "(i32").is_err());
        assert!(MethodSignature::parse_descriptor("C", "m", "(i32)").is_err());
        assert!(MethodSignature::parse_descriptor("C", "m", "(,i32)void").is_err());
    }

    #[test]
    fn test_signature_display() {
        let sig =
            MethodSignature::parse_descriptor("demo.Calc", "scale", "(f32,string)void").unwrap();
        assert_eq!(sig.to_string(), "demo.Calc.scale(f32,string)void");
    }
}
