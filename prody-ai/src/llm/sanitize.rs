//! Strips AI self-reference disclaimers from generated text.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Disclaimer openers removed from the start of every response.
///
/// Longer phrases come first so alternation prefers them.
pub const DEFAULT_DISCLAIMERS: &[&str] = &[
    "as an ai language model",
    "as an ai assistant",
    "as a language model",
    "as an ai",
    "i'm just an ai",
    "i’m just an ai",
    "i am just an ai",
    "i'm an ai",
    "i’m an ai",
    "i am an ai",
];

fn build_pattern(prefixes: &[&str]) -> std::result::Result<Regex, regex::Error> {
    let alternation = prefixes
        .iter()
        .map(|p| regex::escape(p.trim()))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)^(?:{alternation})\b[\s,.:;!\-]*"))
}

fn default_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        build_pattern(DEFAULT_DISCLAIMERS).expect("escaped literal alternation is a valid regex")
    })
}

/// Removes disclaimer prefixes, repeatedly, until none match.
///
/// `sanitize(sanitize(x)) == sanitize(x)` for every input.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    pattern: Regex,
}

impl Sanitizer {
    /// Sanitizer over a custom prefix list (matched case-insensitively).
    pub fn new(prefixes: &[&str]) -> Result<Self> {
        if prefixes.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::config("sanitizer needs at least one prefix"));
        }
        let pattern = build_pattern(prefixes)
            .map_err(|e| Error::config(format!("invalid disclaimer prefix: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn sanitize(&self, text: &str) -> String {
        let mut rest = text.trim();
        while let Some(m) = self.pattern.find(rest) {
            if m.end() == 0 {
                break;
            }
            rest = rest[m.end()..].trim_start();
        }
        rest.trim_end().to_string()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            pattern: default_pattern().clone(),
        }
    }
}
