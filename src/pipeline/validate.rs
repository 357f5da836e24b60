//! Validation of extracted text.
//!
//! A pure function: no I/O, no configuration lookups beyond the
//! [`ValidationConfig`] passed in. An invalid result is a *warning* that
//! travels with the notification; it never aborts the pipeline.

use crate::config::ValidationConfig;
use serde::{Deserialize, Serialize};

/// Statistics and verdict for one extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    /// Characters in the trimmed text.
    pub char_count: usize,
    pub word_count: usize,
    pub line_count: usize,
    /// At least one character falls in a configured script range.
    pub has_language_signal: bool,
    /// Fraction of characters in the configured script ranges, in `[0, 1]`.
    pub language_ratio: f64,
    /// Why the text is invalid. `None` when valid.
    pub reason: Option<String>,
}

impl ValidationReport {
    fn invalid(reason: &str) -> Self {
        Self {
            is_valid: false,
            char_count: 0,
            word_count: 0,
            line_count: 0,
            has_language_signal: false,
            language_ratio: 0.0,
            reason: Some(reason.to_string()),
        }
    }
}

/// Classify extracted text.
pub fn validate_text(text: &str, config: &ValidationConfig) -> ValidationReport {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ValidationReport::invalid("Empty text");
    }

    let char_count = trimmed.chars().count();
    if char_count < config.min_chars {
        return ValidationReport {
            char_count,
            ..ValidationReport::invalid("Text too short")
        };
    }

    let in_script = trimmed
        .chars()
        .filter(|c| config.script_ranges.iter().any(|r| r.contains(*c)))
        .count();

    ValidationReport {
        is_valid: true,
        char_count,
        word_count: trimmed.split_whitespace().count(),
        line_count: trimmed.split('\n').count(),
        has_language_signal: in_script > 0,
        language_ratio: in_script as f64 / char_count as f64,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptRange;

    fn cfg() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[test]
    fn empty_and_whitespace_are_invalid() {
        for t in ["", "   ", "\n\t \n"] {
            let r = validate_text(t, &cfg());
            assert!(!r.is_valid);
            assert_eq!(r.reason.as_deref(), Some("Empty text"));
        }
    }

    #[test]
    fn four_chars_or_fewer_is_invalid() {
        for t in ["a", "ab", "abc", "abcd", "  abcd  ", "日本語で"] {
            let r = validate_text(t, &cfg());
            assert!(!r.is_valid, "{t:?} should be invalid");
            assert_eq!(r.reason.as_deref(), Some("Text too short"));
        }
    }

    #[test]
    fn hello_world_is_valid_with_two_words() {
        let r = validate_text("Hello world", &cfg());
        assert!(r.is_valid);
        assert_eq!(r.reason, None);
        assert_eq!(r.char_count, 11);
        assert_eq!(r.word_count, 2);
        assert_eq!(r.line_count, 1);
        assert!(!r.has_language_signal);
        assert_eq!(r.language_ratio, 0.0);
    }

    #[test]
    fn counts_lines_and_words() {
        let r = validate_text("first line\nsecond  line here\nthird", &cfg());
        assert!(r.is_valid);
        assert_eq!(r.line_count, 3);
        assert_eq!(r.word_count, 6);
    }

    #[test]
    fn japanese_text_sets_language_signal() {
        let r = validate_text("請求書 No. 12", &cfg());
        assert!(r.is_valid);
        assert!(r.has_language_signal);
        assert!(r.language_ratio > 0.0 && r.language_ratio < 1.0);

        let r = validate_text("ひらがなカタカナ", &cfg());
        assert_eq!(r.language_ratio, 1.0);
    }

    #[test]
    fn custom_ranges_and_min_chars() {
        let c = ValidationConfig {
            min_chars: 2,
            script_ranges: vec![ScriptRange(0x0400, 0x04FF)],
        };
        let r = validate_text("да", &c);
        assert!(r.is_valid);
        assert!(r.has_language_signal);
        assert!(!validate_text("x", &c).is_valid);
    }
}
