use once_cell::sync::Lazy;
use regex::Regex;

static JAPANESE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{3040}-\u{309F}\u{30A0}-\u{30FF}\u{4E00}-\u{9FFF}]").expect("valid regex"));

pub fn contains_japanese(text: &str) -> bool {
    JAPANESE_RE.is_match(text)
}
