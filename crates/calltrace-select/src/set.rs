//! Selection sets and the copy-on-write selection store.
//!
//! A [`SelectionSet`] holds two ordered rule collections (including and
//! excluding) and answers, per method signature, whether the method is
//! selected for instrumentation and whether argument values should be
//! captured. The [`SelectionStore`] publishes an immutable snapshot of the
//! active set and swaps it atomically when an edited copy is assigned, so a
//! load-time reader never observes a half-applied edit.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::grammar::{self, RuleLine};
use crate::pattern::MethodPattern;
use crate::types::MethodSignature;

/// How a selected method should be instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instrumentation {
    /// Record actual argument values at entry.
    pub capture_arguments: bool,
}

/// Include/exclude rule collections.
///
/// Both collections are ordered by the patterns' canonical string form, which
/// is also the uniqueness key: inserting a rule whose canonical form is
/// already present replaces the earlier rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    including: BTreeSet<MethodPattern>,
    excluding: BTreeSet<MethodPattern>,
}

impl SelectionSet {
    /// Create an empty selection set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from parsed rule lines.
    pub fn from_rules(rules: impl IntoIterator<Item = RuleLine>) -> Self {
        let mut set = Self::new();
        for rule in rules {
            set.add_rule(rule.pattern, rule.is_excluding);
        }
        set
    }

    /// Add a rule to the including or excluding collection.
    ///
    /// At most one rule per canonical form survives; a later insertion with
    /// the same canonical key replaces the earlier rule.
    pub fn add_rule(&mut self, pattern: MethodPattern, is_excluding: bool) {
        let target = if is_excluding {
            &mut self.excluding
        } else {
            &mut self.including
        };
        target.replace(pattern);
    }

    /// Remove the rule with this exact canonical form, if present.
    pub fn remove_exact_rule(&mut self, pattern: &MethodPattern, is_excluding: bool) -> bool {
        let target = if is_excluding {
            &mut self.excluding
        } else {
            &mut self.including
        };
        target.remove(pattern)
    }

    /// The including rules, in canonical order.
    pub fn including_rules(&self) -> impl Iterator<Item = &MethodPattern> {
        self.including.iter()
    }

    /// The excluding rules, in canonical order.
    pub fn excluding_rules(&self) -> impl Iterator<Item = &MethodPattern> {
        self.excluding.iter()
    }

    /// Number of rules across both collections.
    pub fn len(&self) -> usize {
        self.including.len() + self.excluding.len()
    }

    /// Whether both collections are empty.
    pub fn is_empty(&self) -> bool {
        self.including.is_empty() && self.excluding.is_empty()
    }

    /// Enabled including rules matching the signature.
    pub fn matching_include_rules(&self, signature: &MethodSignature) -> BTreeSet<MethodPattern> {
        matching_rules(&self.including, signature)
    }

    /// Enabled excluding rules matching the signature.
    pub fn matching_exclude_rules(&self, signature: &MethodSignature) -> BTreeSet<MethodPattern> {
        matching_rules(&self.excluding, signature)
    }

    /// Whether the method is selected for instrumentation.
    ///
    /// A method is selected iff no excluding rule matches it and at least one
    /// including rule does. Exclusion always wins, no matter how specific the
    /// competing include rule is; this asymmetry is deliberate.
    pub fn is_selected(&self, signature: &MethodSignature) -> bool {
        self.decide(signature).is_some()
    }

    /// The instrumentation decision for a method: `None` when not selected,
    /// otherwise whether any matching include rule requests argument capture.
    pub fn decide(&self, signature: &MethodSignature) -> Option<Instrumentation> {
        let excluded = self
            .excluding
            .iter()
            .filter(|rule| rule.enabled)
            .any(|rule| rule.matches(signature));
        if excluded {
            debug!(method = %signature, "Method excluded by rule");
            return None;
        }
        let mut capture_arguments = false;
        let mut included = false;
        for rule in self.including.iter().filter(|rule| rule.enabled) {
            if rule.matches(signature) {
                included = true;
                capture_arguments |= rule.captures_arguments();
            }
        }
        included.then_some(Instrumentation { capture_arguments })
    }

    /// A copy with disabled rules and empty-parameter-list rules stripped.
    ///
    /// This is the shape the store publishes: every rule in an active
    /// snapshot is enabled and meaningful.
    pub fn normalized(&self) -> SelectionSet {
        let keep = |rule: &&MethodPattern| rule.enabled && !rule.params.is_empty_exact();
        SelectionSet {
            including: self.including.iter().filter(keep).cloned().collect(),
            excluding: self.excluding.iter().filter(keep).cloned().collect(),
        }
    }

    /// Render the set in rule-grammar lines, including rules first.
    pub fn to_rule_lines(&self) -> String {
        let mut out = String::new();
        for rule in &self.including {
            out.push_str(&grammar::format_rule_line(rule, false));
            out.push('\n');
        }
        for rule in &self.excluding {
            out.push_str(&grammar::format_rule_line(rule, true));
            out.push('\n');
        }
        out
    }
}

fn matching_rules(
    rules: &BTreeSet<MethodPattern>,
    signature: &MethodSignature,
) -> BTreeSet<MethodPattern> {
    rules
        .iter()
        .filter(|rule| rule.enabled && rule.matches(signature))
        .cloned()
        .collect()
}

/// Publishes the active [`SelectionSet`] to concurrent readers.
///
/// Readers take cheap [`Arc`] snapshots; editors clone a working copy, mutate
/// it freely, and [`assign`](SelectionStore::assign) it back, which
/// normalizes the copy and swaps the active reference in one step. A
/// transform-time reader therefore always sees a consistent whole set, never
/// an interleaving of old and new rules.
#[derive(Debug, Default)]
pub struct SelectionStore {
    active: RwLock<Arc<SelectionSet>>,
}

impl SelectionStore {
    /// Create a store publishing the given set (normalized).
    pub fn new(set: SelectionSet) -> Self {
        Self {
            active: RwLock::new(Arc::new(set.normalized())),
        }
    }

    /// The current snapshot. The returned reference stays consistent even if
    /// an editor assigns a new set afterwards.
    pub fn snapshot(&self) -> Arc<SelectionSet> {
        Arc::clone(&self.active.read())
    }

    /// A deep, independent copy of the active set for editing.
    pub fn edit_copy(&self) -> SelectionSet {
        SelectionSet::clone(&self.active.read())
    }

    /// Atomically replace the active set with a normalized copy of `edited`.
    pub fn assign(&self, edited: SelectionSet) {
        let normalized = Arc::new(edited.normalized());
        info!(rules = normalized.len(), "Selection rules assigned");
        *self.active.write() = normalized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parse_rule_line;
    use crate::pattern::ParamPattern;

    fn sig(class: &str, method: &str, desc: &str) -> MethodSignature {
        MethodSignature::parse_descriptor(class, method, desc).unwrap()
    }

    fn set_of(lines: &[&str]) -> SelectionSet {
        SelectionSet::from_rules(lines.iter().map(|line| parse_rule_line(line).unwrap()))
    }

    #[test]
    fn test_include_selects() {
        let set = set_of(&["demo.*.add(*)"]);
        assert!(set.is_selected(&sig("demo.math.Calc", "add", "(i32,i64)i64")));
        assert!(!set.is_selected(&sig("demo.math.Calc", "sub", "(i32)i32")));
    }

    #[test]
    fn test_exclusion_wins_regardless_of_specificity() {
        // The include rule names the exact method; the exclude rule is the
        // broadest possible. Exclusion still wins.
        let set = set_of(&["demo.Calc.add(i32,i64)", "!*.*(*)"]);
        assert!(!set.is_selected(&sig("demo.Calc", "add", "(i32,i64)i64")));
    }

    #[test]
    fn test_no_include_means_not_selected() {
        let set = set_of(&["!demo.Calc.slow(*)"]);
        assert!(!set.is_selected(&sig("demo.Calc", "fast", "()void")));
    }

    #[test]
    fn test_capture_from_any_matching_include() {
        let set = set_of(&["demo.Calc.*(*)", "*.*(*+)"]);
        let decision = set.decide(&sig("demo.Calc", "add", "(i32)i32")).unwrap();
        assert!(decision.capture_arguments);

        let plain = set_of(&["demo.Calc.*(*)"]);
        let decision = plain.decide(&sig("demo.Calc", "add", "(i32)i32")).unwrap();
        assert!(!decision.capture_arguments);
    }

    #[test]
    fn test_duplicate_canonical_key_does_not_survive() {
        let mut set = SelectionSet::new();
        let rule = parse_rule_line("demo.Calc.add(*)").unwrap().pattern;
        set.add_rule(rule.clone(), false);
        set.add_rule(rule.clone().with_enabled(false), false);
        assert_eq!(set.including_rules().count(), 1);
        // The replacement carries the later flag.
        assert!(!set.including_rules().next().unwrap().enabled);
    }

    #[test]
    fn test_remove_exact_rule() {
        let mut set = set_of(&["demo.Calc.add(*)", "!demo.Calc.slow(*)"]);
        let rule = parse_rule_line("demo.Calc.add(*)").unwrap().pattern;
        assert!(set.remove_exact_rule(&rule, false));
        assert!(!set.remove_exact_rule(&rule, false));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_matching_rule_collections() {
        let set = set_of(&["demo.Calc.add(*)", "demo.*.add(*)", "!other.C.m(*)"]);
        let matches = set.matching_include_rules(&sig("demo.Calc", "add", "(i32)i32"));
        assert_eq!(matches.len(), 2);
        assert!(
            set.matching_exclude_rules(&sig("demo.Calc", "add", "(i32)i32"))
                .is_empty()
        );
    }

    #[test]
    fn test_normalized_strips_disabled_and_empty() {
        let mut set = set_of(&["demo.Calc.add(*)"]);
        set.add_rule(
            parse_rule_line("demo.Calc.off(*)")
                .unwrap()
                .pattern
                .with_enabled(false),
            false,
        );
        set.add_rule(
            MethodPattern::new("demo.Calc", "blank", ParamPattern::Exact(Vec::new())),
            false,
        );
        let normalized = set.normalized();
        assert_eq!(normalized.len(), 1);
        assert_eq!(
            normalized.including_rules().next().unwrap().canonical(),
            "demo.Calc.add(*)"
        );
    }

    #[test]
    fn test_rule_lines_round_trip() {
        let set = set_of(&["a.B.m(*)", "z.Z.n(i32)", "!c.D.o(*+)"]);
        let text = set.to_rule_lines();
        let reparsed = SelectionSet::from_rules(grammar::parse_rules(&text).unwrap());
        assert_eq!(reparsed, set);
    }

    #[test]
    fn test_store_snapshot_is_stable_across_assign() {
        let store = SelectionStore::new(set_of(&["demo.Calc.add(*)"]));
        let before = store.snapshot();

        let mut copy = store.edit_copy();
        copy.add_rule(parse_rule_line("!*.*(*)").unwrap().pattern, true);
        store.assign(copy);

        // The old snapshot is unchanged; the new one sees the exclusion.
        assert!(before.is_selected(&sig("demo.Calc", "add", "(i32)i32")));
        assert!(!store.snapshot().is_selected(&sig("demo.Calc", "add", "(i32)i32")));
    }
}
