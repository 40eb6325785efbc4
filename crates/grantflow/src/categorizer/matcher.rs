use regex::Regex;
use std::collections::HashMap;

use crate::config::schema::{CompoundMatch, MatchCondition, SimpleMatch};

/// Evaluates [`MatchCondition`] trees and reports which terms matched.
///
/// A condition that matches yields `Some(terms)`; the terms are the literal
/// keywords found, or for patterns the first capture group (whole match when
/// the pattern has no group). `not` contributes no terms.
pub struct RuleMatcher {
    /// Pre-compiled regex patterns, indexed by pattern string
    compiled_patterns: HashMap<String, Regex>,
}

impl RuleMatcher {
    pub fn new<'a>(conditions: impl IntoIterator<Item = &'a MatchCondition>) -> Self {
        let mut compiled_patterns = HashMap::new();
        for condition in conditions {
            Self::collect_patterns(condition, &mut compiled_patterns);
        }
        Self { compiled_patterns }
    }

    /// Recursively collects and compiles regex patterns from match conditions.
    fn collect_patterns(condition: &MatchCondition, patterns: &mut HashMap<String, Regex>) {
        match condition {
            MatchCondition::Simple(simple) => {
                if let Some(pattern) = &simple.pattern {
                    if !patterns.contains_key(pattern) {
                        match Regex::new(pattern) {
                            Ok(regex) => {
                                patterns.insert(pattern.clone(), regex);
                            }
                            Err(e) => {
                                tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid rule pattern");
                            }
                        }
                    }
                }
            }
            MatchCondition::Compound(compound) => {
                for cond in compound.all.iter().chain(compound.any.iter()).flatten() {
                    Self::collect_patterns(cond, patterns);
                }
                if let Some(not) = &compound.not {
                    Self::collect_patterns(not, patterns);
                }
            }
        }
    }

    pub fn matches(&self, condition: &MatchCondition, text: &str) -> bool {
        self.matched_terms(condition, text).is_some()
    }

    pub fn matched_terms(&self, condition: &MatchCondition, text: &str) -> Option<Vec<String>> {
        match condition {
            MatchCondition::Compound(compound) => self.match_compound(compound, text),
            MatchCondition::Simple(simple) => self.match_simple(simple, text),
        }
    }

    fn match_compound(&self, compound: &CompoundMatch, text: &str) -> Option<Vec<String>> {
        // 'all' - every condition must match
        if let Some(all) = &compound.all {
            let mut terms = Vec::new();
            for cond in all {
                extend_unique(&mut terms, self.matched_terms(cond, text)?);
            }
            return Some(terms);
        }

        // 'any' - at least one condition must match; terms from all that do
        if let Some(any) = &compound.any {
            let mut terms = Vec::new();
            let mut matched = false;
            for cond in any {
                if let Some(found) = self.matched_terms(cond, text) {
                    matched = true;
                    extend_unique(&mut terms, found);
                }
            }
            return matched.then_some(terms);
        }

        // 'not' - condition must not match
        if let Some(not) = &compound.not {
            return match self.matched_terms(not, text) {
                Some(_) => None,
                None => Some(Vec::new()),
            };
        }

        None
    }

    fn match_simple(&self, simple: &SimpleMatch, text: &str) -> Option<Vec<String>> {
        if let Some(contains) = &simple.contains {
            return text.contains(contains.as_str()).then(|| vec![contains.clone()]);
        }

        if let Some(contains_any) = &simple.contains_any {
            let found: Vec<String> = contains_any
                .iter()
                .filter(|s| text.contains(s.as_str()))
                .cloned()
                .collect();
            return (!found.is_empty()).then_some(found);
        }

        if let Some(contains_all) = &simple.contains_all {
            return contains_all
                .iter()
                .all(|s| text.contains(s.as_str()))
                .then(|| contains_all.clone());
        }

        if let Some(pattern) = &simple.pattern {
            let regex = self.compiled_patterns.get(pattern)?;
            let mut found = Vec::new();
            for caps in regex.captures_iter(text) {
                let term = caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str().trim());
                if let Some(term) = term.filter(|t| !t.is_empty()) {
                    if !found.iter().any(|f: &String| f == term) {
                        found.push(term.to_string());
                    }
                }
            }
            return (!found.is_empty()).then_some(found);
        }

        None
    }
}

fn extend_unique(terms: &mut Vec<String>, more: Vec<String>) {
    for term in more {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
}
