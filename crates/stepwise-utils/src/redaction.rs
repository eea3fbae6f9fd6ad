//! Secret redaction for user-facing strings.
//!
//! Error messages from upstream providers routinely echo request URLs and
//! header values. Everything printed to the terminal, written into the event
//! store, or logged from an error path passes through [`SecretRedactor`].

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

/// Definition of a built-in secret pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecretPatternDef {
    pub id: &'static str,
    pub regex: &'static str,
    pub description: &'static str,
}

pub static DEFAULT_SECRET_PATTERNS: &[SecretPatternDef] = &[
    SecretPatternDef {
        id: "openai_api_key",
        regex: r"sk-[A-Za-z0-9_\-]{20,}",
        description: "OpenAI-style secret keys",
    },
    SecretPatternDef {
        id: "bearer_token",
        regex: r"(?i)bearer\s+[A-Za-z0-9_\-\.=]{16,}",
        description: "Authorization bearer tokens",
    },
    SecretPatternDef {
        id: "url_credentials",
        regex: r"://[^/\s:@]+:[^/\s@]+@",
        description: "user:password pairs embedded in URLs",
    },
    SecretPatternDef {
        id: "api_key_assignment",
        regex: r#"(?i)(?:api[_-]?key|access[_-]?token|secret)["']?\s*[=:]\s*["']?[A-Za-z0-9_\-\.]{12,}"#,
        description: "key=value assignments of API keys and tokens",
    },
    SecretPatternDef {
        id: "github_token",
        regex: r"gh[pousr]_[A-Za-z0-9]{36,}",
        description: "GitHub personal access tokens",
    },
];

/// Compiled redactor over a set of secret patterns.
#[derive(Debug, Clone)]
pub struct SecretRedactor {
    regex_set: RegexSet,
    patterns: Vec<(String, Regex)>,
}

impl SecretRedactor {
    /// Build a redactor over [`DEFAULT_SECRET_PATTERNS`].
    pub fn new() -> Result<Self> {
        Self::with_extra_patterns(&[])
    }

    /// Build a redactor over the defaults plus caller-supplied patterns.
    pub fn with_extra_patterns(extra: &[String]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(DEFAULT_SECRET_PATTERNS.len() + extra.len());
        for def in DEFAULT_SECRET_PATTERNS {
            let regex = Regex::new(def.regex)
                .with_context(|| format!("Invalid built-in secret pattern '{}'", def.id))?;
            patterns.push((def.id.to_string(), regex));
        }
        for (idx, pattern) in extra.iter().enumerate() {
            let regex = Regex::new(pattern)
                .with_context(|| format!("Invalid extra secret pattern '{pattern}'"))?;
            patterns.push((format!("extra_pattern_{idx}"), regex));
        }

        let regex_set = RegexSet::new(patterns.iter().map(|(_, r)| r.as_str()))
            .context("Failed to compile RegexSet for secret redaction")?;

        Ok(Self {
            regex_set,
            patterns,
        })
    }

    /// True when any pattern matches.
    #[must_use]
    pub fn contains_secret(&self, text: &str) -> bool {
        self.regex_set.is_match(text)
    }

    /// Replace every detected secret with `***`.
    #[must_use]
    pub fn redact_string(&self, text: &str) -> String {
        let matches = self.regex_set.matches(text);
        if !matches.matched_any() {
            return text.to_string();
        }

        let mut redacted = text.to_string();
        for index in matches.iter() {
            if let Some((_, regex)) = self.patterns.get(index) {
                redacted = regex.replace_all(&redacted, "***").into_owned();
            }
        }
        redacted
    }

    /// IDs of the patterns that match `text`.
    #[must_use]
    pub fn matching_pattern_ids(&self, text: &str) -> Vec<&str> {
        self.regex_set
            .matches(text)
            .iter()
            .filter_map(|i| self.patterns.get(i).map(|(id, _)| id.as_str()))
            .collect()
    }
}

// The built-in patterns are literals covered by the tests below.
static DEFAULT_REDACTOR: Lazy<SecretRedactor> = Lazy::new(|| {
    SecretRedactor::new().unwrap_or_else(|e| panic!("built-in secret patterns must compile: {e}"))
});

/// Process-global redactor over the default patterns.
#[must_use]
pub fn default_redactor() -> &'static SecretRedactor {
    &DEFAULT_REDACTOR
}

/// Redact a user-facing string with the default redactor.
#[must_use]
pub fn redact_user_string(text: &str) -> String {
    default_redactor().redact_string(text)
}
