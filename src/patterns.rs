//! Caller-supplied regex extraction over OCR text.
//!
//! Pure functions, no async. Patterns are compiled up front so a bad regex
//! is rejected before the upload is stored or sent to the engine.

use std::collections::{BTreeMap, HashSet};

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::ValidationError;
use crate::models::{ExtractionPattern, PatternMatch};

/// Compiled regexes are capped so a hostile pattern cannot blow up memory.
const REGEX_SIZE_LIMIT: usize = 1 << 20;
const MAX_PATTERNS: usize = 64;

/// Pre-compiled regex patterns ready for matching.
#[derive(Debug)]
pub struct CompiledPatterns {
    patterns: Vec<CompiledPattern>,
}

#[derive(Debug)]
struct CompiledPattern {
    name: String,
    regex: Regex,
}

impl CompiledPatterns {
    /// Compile every pattern, failing on the first invalid or duplicate one.
    pub fn compile(patterns: &[ExtractionPattern]) -> Result<Self, ValidationError> {
        if patterns.len() > MAX_PATTERNS {
            return Err(ValidationError::InvalidPattern {
                name: "patterns".to_string(),
                reason: format!("at most {} patterns per request", MAX_PATTERNS),
            });
        }

        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(patterns.len());

        for p in patterns {
            let name = p.name.trim();
            if name.is_empty() {
                return Err(ValidationError::InvalidPattern {
                    name: p.pattern.clone(),
                    reason: "pattern name must not be empty".to_string(),
                });
            }
            if !seen.insert(name.to_string()) {
                return Err(ValidationError::InvalidPattern {
                    name: name.to_string(),
                    reason: "duplicate pattern name".to_string(),
                });
            }

            let regex = RegexBuilder::new(&p.pattern)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| ValidationError::InvalidPattern {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;

            compiled.push(CompiledPattern {
                name: name.to_string(),
                regex,
            });
        }

        debug!("Compiled {} extraction patterns", compiled.len());
        Ok(Self { patterns: compiled })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Run all patterns against `text`, returning name → matches in order.
    ///
    /// Every pattern appears in the result, with an empty list when nothing
    /// matched. A match is the whole match for patterns without groups, group 1
    /// for patterns with one, and all groups for patterns with several.
    pub fn extract(&self, text: &str) -> BTreeMap<String, Vec<PatternMatch>> {
        self.patterns
            .iter()
            .map(|pattern| {
                // captures_len counts the implicit whole-match group 0.
                let groups = pattern.regex.captures_len() - 1;
                let values = pattern
                    .regex
                    .captures_iter(text)
                    .map(|cap| {
                        let group = |i: usize| cap.get(i).map(|m| m.as_str()).unwrap_or_default().to_string();
                        match groups {
                            0 => PatternMatch::Text(group(0)),
                            1 => PatternMatch::Text(group(1)),
                            n => PatternMatch::Groups((1..=n).map(group).collect()),
                        }
                    })
                    .collect();
                (pattern.name.clone(), values)
            })
            .collect()
    }
}
