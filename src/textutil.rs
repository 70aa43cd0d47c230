use once_cell::sync::Lazy;
use regex::Regex;

static LANG_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("lang code"));

/// Case- and edge-whitespace-insensitive comparison used to detect
/// translations that did not change the source.
pub fn same_text(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Rough token count: the mean of a chars/4 and a words/0.75 estimate.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let chars = text.chars().count() as f64;
    let words = text.split_whitespace().count() as f64;
    ((chars / 4.0 + words / 0.75) / 2.0) as usize
}

pub fn normalize_language_code(code: &str) -> String {
    code.trim().to_ascii_lowercase().replace('_', "-")
}

pub fn is_valid_language_code(code: &str) -> bool {
    LANG_CODE_RE.is_match(code)
}

/// Display name used in prompts; unknown codes are passed through.
pub fn language_name(code: &str) -> String {
    let base = code.split('-').next().unwrap_or(code);
    let name = match base {
        "es" => "Spanish",
        "en" => "English",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        "ca" => "Catalan",
        "pl" => "Polish",
        "zh" => "Chinese",
        "ja" => "Japanese",
        _ => return code.to_string(),
    };
    name.to_string()
}
