//! Method-selection patterns.
//!
//! A [`MethodPattern`] decides whether a method signature is covered by a
//! rule. The class position is dot-segmented (`*` matches exactly one
//! segment, and a lone `*` matches any class); the method position is an
//! exact name or `*`; the parameter position is either an exact token list
//! or the any-arity wildcard, with an optional capture marker requesting
//! argument-value capture.
//!
//! Pattern identity is the canonical string `class.method(params)`: equality,
//! ordering, and hashing all go through it, and the `enabled` flag never
//! participates. This makes the canonical form the uniqueness key inside rule
//! collections.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{ParseError, ParseResult};
use crate::types::{MethodSignature, TypeKind};

/// One token of an exact parameter pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamToken {
    /// `*`: one parameter of any kind.
    Wildcard,
    /// A concrete kind the parameter must have.
    Kind(TypeKind),
}

impl fmt::Display for ParamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamToken::Wildcard => write!(f, "*"),
            ParamToken::Kind(kind) => write!(f, "{}", kind),
        }
    }
}

/// The parameter position of a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamPattern {
    /// `*` or `*+`: any arity, any kinds. With `capture`, the rule also
    /// requests that actual argument values be recorded at entry.
    Any {
        /// Whether the capture marker was present.
        capture: bool,
    },
    /// An explicit token list; arity and per-position kind must match.
    Exact(Vec<ParamToken>),
}

impl ParamPattern {
    /// Parse the text between the parentheses of a rule.
    pub fn parse(text: &str) -> ParseResult<Self> {
        let trimmed = text.trim();
        match trimmed {
            "" => return Ok(ParamPattern::Exact(Vec::new())),
            "*" => return Ok(ParamPattern::Any { capture: false }),
            "*+" | "+" => return Ok(ParamPattern::Any { capture: true }),
            _ => {}
        }
        if trimmed.contains('+') {
            return Err(ParseError::MisplacedCaptureMarker {
                pattern: trimmed.to_string(),
            });
        }
        let mut tokens = Vec::new();
        for token in trimmed.split(',') {
            let token = token.trim();
            if token == "*" {
                tokens.push(ParamToken::Wildcard);
            } else {
                tokens.push(ParamToken::Kind(TypeKind::parse_token(token)?));
            }
        }
        Ok(ParamPattern::Exact(tokens))
    }

    /// Whether this pattern matches the given parameter kinds.
    pub fn matches(&self, params: &[TypeKind]) -> bool {
        match self {
            ParamPattern::Any { .. } => true,
            ParamPattern::Exact(tokens) => {
                tokens.len() == params.len()
                    && tokens.iter().zip(params).all(|(token, kind)| match token {
                        ParamToken::Wildcard => true,
                        ParamToken::Kind(expected) => expected == kind,
                    })
            }
        }
    }

    /// Whether the capture marker is present.
    pub fn captures_arguments(&self) -> bool {
        matches!(self, ParamPattern::Any { capture: true })
    }

    /// An exact pattern with no tokens; such rules match nothing useful and
    /// are stripped when a selection snapshot is normalized.
    pub fn is_empty_exact(&self) -> bool {
        matches!(self, ParamPattern::Exact(tokens) if tokens.is_empty())
    }
}

impl fmt::Display for ParamPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamPattern::Any { capture: false } => write!(f, "*"),
            ParamPattern::Any { capture: true } => write!(f, "*+"),
            ParamPattern::Exact(tokens) => {
                let mut first = true;
                for token in tokens {
                    if !first {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", token)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

/// A single selection rule.
///
/// Whether the rule includes or excludes is not part of the pattern; the two
/// collections of a selection set carry that distinction.
#[derive(Debug, Clone)]
pub struct MethodPattern {
    /// Dot-segmented class pattern; `*` matches exactly one segment.
    pub class_pattern: String,
    /// Method-name pattern; `*` matches any name.
    pub method_pattern: String,
    /// Parameter pattern.
    pub params: ParamPattern,
    /// Disabled rules are kept while editing but stripped from active
    /// snapshots; the flag is not part of pattern identity.
    pub enabled: bool,
}

impl MethodPattern {
    /// Create an enabled pattern.
    pub fn new(
        class_pattern: impl Into<String>,
        method_pattern: impl Into<String>,
        params: ParamPattern,
    ) -> Self {
        Self {
            class_pattern: class_pattern.into(),
            method_pattern: method_pattern.into(),
            params,
            enabled: true,
        }
    }

    /// The canonical `class.method(params)` form: the identity key of the
    /// pattern inside rule collections.
    pub fn canonical(&self) -> String {
        format!(
            "{}.{}({})",
            self.class_pattern, self.method_pattern, self.params
        )
    }

    /// Whether the class pattern covers the given qualified class name.
    ///
    /// A pattern that is exactly `*` covers every class. Otherwise matching
    /// is segment-wise: the pattern and the name must have the same number
    /// of dot-delimited segments, and each pattern segment is either `*` or
    /// an exact match.
    pub fn matches_class(&self, class_name: &str) -> bool {
        if self.class_pattern == "*" {
            return true;
        }
        let mut pattern_segments = self.class_pattern.split('.');
        let mut name_segments = class_name.split('.');
        loop {
            match (pattern_segments.next(), name_segments.next()) {
                (Some(p), Some(n)) => {
                    if p != "*" && p != n {
                        return false;
                    }
                }
                (None, None) => return true,
                _ => return false,
            }
        }
    }

    /// Whether the method-name pattern covers the given name.
    pub fn matches_method_name(&self, method_name: &str) -> bool {
        self.method_pattern == "*" || self.method_pattern == method_name
    }

    /// Whether this pattern covers the whole signature.
    pub fn matches(&self, signature: &MethodSignature) -> bool {
        self.matches_class(&signature.class_name)
            && self.matches_method_name(&signature.method_name)
            && self.params.matches(&signature.params)
    }

    /// Whether this rule requests argument-value capture.
    pub fn captures_arguments(&self) -> bool {
        self.params.captures_arguments()
    }

    /// Return a copy with the enabled flag set as given.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Display for MethodPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl PartialEq for MethodPattern {
    fn eq(&self, other: &Self) -> bool {
        self.canonical() == other.canonical()
    }
}

impl Eq for MethodPattern {}

impl PartialOrd for MethodPattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MethodPattern {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical().cmp(&other.canonical())
    }
}

impl Hash for MethodPattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReturnKind;

    fn sig(class: &str, method: &str, desc: &str) -> MethodSignature {
        MethodSignature::parse_descriptor(class, method, desc).unwrap()
    }

    #[test]
    fn test_class_segment_wildcard() {
        let pattern = MethodPattern::new("demo.*.Calc", "*", ParamPattern::Any { capture: false });
        assert!(pattern.matches_class("demo.math.Calc"));
        assert!(pattern.matches_class("demo.text.Calc"));
        assert!(!pattern.matches_class("demo.Calc"));
        assert!(!pattern.matches_class("demo.math.deep.Calc"));
    }

    #[test]
    fn test_lone_wildcard_matches_any_class() {
        let pattern = MethodPattern::new("*", "*", ParamPattern::Any { capture: false });
        assert!(pattern.matches_class("Calc"));
        assert!(pattern.matches_class("demo.Calc"));
        assert!(pattern.matches_class("demo.math.deep.Calc"));
    }

    #[test]
    fn test_method_name_wildcard() {
        let pattern = MethodPattern::new("demo.Calc", "*", ParamPattern::Any { capture: false });
        assert!(pattern.matches(&sig("demo.Calc", "add", "(i32)i32")));
        assert!(pattern.matches(&sig("demo.Calc", "reset", "()void")));
        assert!(!pattern.matches(&sig("demo.Other", "add", "(i32)i32")));
    }

    #[test]
    fn test_any_param_pattern_matches_all_arities() {
        let pattern = ParamPattern::parse("*").unwrap();
        assert!(pattern.matches(&[]));
        assert!(pattern.matches(&[TypeKind::I32, TypeKind::Ref("string".into())]));
    }

    #[test]
    fn test_exact_param_pattern() {
        let pattern = ParamPattern::parse("i32,*,demo.Name").unwrap();
        assert!(pattern.matches(&[
            TypeKind::I32,
            TypeKind::F64,
            TypeKind::Ref("demo.Name".into())
        ]));
        // Wrong arity
        assert!(!pattern.matches(&[TypeKind::I32, TypeKind::F64]));
        // Wrong kind in a concrete position
        assert!(!pattern.matches(&[
            TypeKind::I64,
            TypeKind::F64,
            TypeKind::Ref("demo.Name".into())
        ]));
    }

    #[test]
    fn test_capture_marker() {
        let pattern = ParamPattern::parse("*+").unwrap();
        assert!(pattern.captures_arguments());
        assert!(pattern.matches(&[]));
        assert!(pattern.matches(&[TypeKind::Bool]));

        assert!(ParamPattern::parse("i32,+").is_err());
        assert!(ParamPattern::parse("i32+").is_err());
    }

    #[test]
    fn test_canonical_identity_ignores_enabled() {
        let a = MethodPattern::new("demo.Calc", "add", ParamPattern::Any { capture: false });
        let b = a.clone().with_enabled(false);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "demo.Calc.add(*)");
    }

    #[test]
    fn test_ordering_is_lexicographic_over_canonical() {
        let a = MethodPattern::new("a.C", "m", ParamPattern::Any { capture: false });
        let b = MethodPattern::new("b.C", "m", ParamPattern::Any { capture: false });
        assert!(a < b);
    }

    #[test]
    fn test_return_kind_not_part_of_matching() {
        let pattern = MethodPattern::new("demo.Calc", "get", ParamPattern::Exact(Vec::new()));
        let mut signature = sig("demo.Calc", "get", "()i32");
        assert!(pattern.matches(&signature));
        signature.ret = ReturnKind::Void;
        assert!(pattern.matches(&signature));
    }
}
