use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Normalize free text for approximate comparison: NFD-decompose, drop the
/// combining marks (accents), lowercase, keep only `[a-z0-9 -]`, trim.
///
/// Pure and total; normalizing twice yields the same string.
pub fn normalize(text: &str) -> String {
    let unaccented: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let kept: String = unaccented
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ' || *c == '-')
        .collect();
    kept.trim().to_string()
}
