//! Assistant mention detection.
//!
//! A mention is the trigger token (default `@claude`) matched
//! case-insensitively. The match must end at a token boundary: the next
//! character is end-of-text, or neither a word character nor `-`. So
//! `@claude, please` and `@Claude` match while `@claude-ish` and
//! `@claudette` do not. Nothing is required before the `@`.

use regex_lite::Regex;

pub const DEFAULT_TRIGGER: &str = "@claude";

#[derive(Debug, Clone)]
pub struct MentionDetector {
    trigger: Regex,
    any_mention: Regex,
}

impl MentionDetector {
    pub fn new(trigger: &str) -> Self {
        let trigger = trigger.trim();
        let trigger = if trigger.is_empty() {
            DEFAULT_TRIGGER
        } else {
            trigger
        };
        let pattern = format!("(?i){}", regex_lite::escape(trigger));
        Self {
            trigger: Regex::new(&pattern).expect("escaped trigger compiles"),
            any_mention: Regex::new(r"@(\w+)").expect("static mention pattern"),
        }
    }

    pub fn contains_mention(&self, text: &str) -> bool {
        self.first_match(text).is_some()
    }

    /// Strip the first mention plus any whitespace after it, then trim.
    pub fn extract_directive(&self, text: &str) -> String {
        let Some((start, end)) = self.first_match(text) else {
            return text.trim().to_string();
        };

        let rest = text[end..].trim_start();
        let mut directive = String::with_capacity(text.len());
        directive.push_str(&text[..start]);
        directive.push_str(rest);
        directive.trim().to_string()
    }

    /// Every `@word` in the text with the marker stripped, in order,
    /// duplicates kept.
    pub fn extract_all_mentions(&self, text: &str) -> Vec<String> {
        self.any_mention
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    fn first_match(&self, text: &str) -> Option<(usize, usize)> {
        self.trigger
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .find(|&(_, end)| ends_at_boundary(text, end))
    }
}

impl Default for MentionDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TRIGGER)
    }
}

fn ends_at_boundary(text: &str, end: usize) -> bool {
    match text[end..].chars().next() {
        None => true,
        Some(next) => !(next.is_alphanumeric() || next == '_' || next == '-'),
    }
}
