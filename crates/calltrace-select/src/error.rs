//! Error types for rule and signature parsing.

use thiserror::Error;

/// Errors produced while parsing rule lines, parameter patterns, or
/// method descriptors.
///
/// Parsing fails fast: a malformed rule or descriptor never yields a
/// best-guess pattern or a partially parsed signature.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The rule line has no parenthesized parameter pattern.
    #[error("Rule has no parameter list: {line:?}")]
    MissingParameterList {
        /// The offending line.
        line: String,
    },

    /// The parameter list is not closed by `)` at the end of the rule.
    #[error("Unterminated parameter list: {line:?}")]
    UnterminatedParameterList {
        /// The offending line.
        line: String,
    },

    /// The part before the parameter list has no `class.method` shape.
    #[error("Rule has no class pattern: {line:?}")]
    MissingClassPattern {
        /// The offending line.
        line: String,
    },

    /// A class or method pattern segment is empty.
    #[error("Empty pattern segment in {pattern:?}")]
    EmptySegment {
        /// The pattern containing the empty segment.
        pattern: String,
    },

    /// A parameter token could not be interpreted.
    #[error("Bad parameter token {token:?}")]
    BadParameterToken {
        /// The offending token.
        token: String,
    },

    /// The capture marker `+` appeared somewhere other than the end of
    /// a wildcard parameter pattern.
    #[error("Misplaced capture marker in {pattern:?}")]
    MisplacedCaptureMarker {
        /// The offending parameter pattern.
        pattern: String,
    },

    /// A method descriptor could not be parsed into parameter/return kinds.
    #[error("Bad method descriptor {descriptor:?}: {reason}")]
    BadDescriptor {
        /// The offending descriptor.
        descriptor: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A rules-file line failed to parse.
    #[error("Line {line}: {source}")]
    AtLine {
        /// One-based line number.
        line: usize,
        /// The underlying parse failure.
        #[source]
        source: Box<ParseError>,
    },
}

/// Result type for parsing operations.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
