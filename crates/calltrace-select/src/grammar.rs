//! The textual rule grammar.
//!
//! One rule per line: `[!]ClassPattern.MethodPattern(ParamPattern)`. A
//! leading `!` marks an excluding rule; its absence marks an including one.
//! This is the only format the rule-editing collaborator reads and writes.

use crate::error::{ParseError, ParseResult};
use crate::pattern::{MethodPattern, ParamPattern};

/// A parsed rule line: the pattern plus which collection it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleLine {
    /// The parsed pattern.
    pub pattern: MethodPattern,
    /// `true` for `!`-prefixed (excluding) rules.
    pub is_excluding: bool,
}

/// Parse a single rule line.
///
/// # Errors
///
/// Fails fast on any malformed line; no best-guess rule is produced.
pub fn parse_rule_line(line: &str) -> ParseResult<RuleLine> {
    let trimmed = line.trim();
    let (body, is_excluding) = match trimmed.strip_prefix('!') {
        Some(rest) => (rest.trim_start(), true),
        None => (trimmed, false),
    };

    let open = body
        .find('(')
        .ok_or_else(|| ParseError::MissingParameterList {
            line: line.to_string(),
        })?;
    let (name_part, param_part) = body.split_at(open);
    let param_part =
        param_part
            .strip_prefix('(')
            .and_then(|p| p.strip_suffix(')'))
            .ok_or_else(|| ParseError::UnterminatedParameterList {
                line: line.to_string(),
            })?;

    let dot = name_part
        .rfind('.')
        .ok_or_else(|| ParseError::MissingClassPattern {
            line: line.to_string(),
        })?;
    let (class_pattern, method_pattern) = name_part.split_at(dot);
    let method_pattern = &method_pattern[1..];

    if class_pattern.split('.').any(str::is_empty) {
        return Err(ParseError::EmptySegment {
            pattern: class_pattern.to_string(),
        });
    }
    if method_pattern.is_empty() {
        return Err(ParseError::EmptySegment {
            pattern: name_part.to_string(),
        });
    }

    let params = ParamPattern::parse(param_part)?;
    Ok(RuleLine {
        pattern: MethodPattern::new(class_pattern, method_pattern, params),
        is_excluding,
    })
}

/// Render a rule back into its line form.
pub fn format_rule_line(pattern: &MethodPattern, is_excluding: bool) -> String {
    if is_excluding {
        format!("!{}", pattern.canonical())
    } else {
        pattern.canonical()
    }
}

/// Parse a whole rules text, one rule per line.
///
/// Blank lines and `#` comment lines are skipped. The first malformed line
/// fails the whole parse with its one-based line number attached.
pub fn parse_rules(text: &str) -> ParseResult<Vec<RuleLine>> {
    let mut rules = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let rule = parse_rule_line(trimmed).map_err(|source| ParseError::AtLine {
            line: index + 1,
            source: Box::new(source),
        })?;
        rules.push(rule);
    }
    Ok(rules)
}
