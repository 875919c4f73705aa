use std::sync::OnceLock;

use regex::Regex;

/// Escape a string for interpolation inside a single-quoted shell word.
///
/// Only single quotes are rewritten (`'` -> `'\''`); every other
/// metacharacter is passed through untouched.
pub fn escape_single_quotes(input: &str) -> String {
    input.replace('\'', r"'\''")
}

fn pull_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https://\S*/pull/\S+").unwrap())
}

/// Find the first HTTPS URL containing `/pull/` in free text.
///
/// The URL token ends at the first whitespace character.
pub fn find_pull_request_url(text: &str) -> Option<String> {
    pull_url_regex().find(text).map(|m| m.as_str().to_string())
}

/// Truncate to `max` characters, appending an ellipsis when cut.
pub fn truncate(input: &str, max: usize) -> String {
    if input.chars().count() <= max {
        return input.to_string();
    }
    let cut: String = input.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}\u{2026}")
}
