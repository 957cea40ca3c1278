use crate::normalize::normalize;

/// The keyword that aborts an active conversation, matched with the same
/// policy as any other trigger.
pub const RESET_KEYWORD: &str = "reset";

/// Phrases whose normalized form is shorter than this never fuzzy-match.
const MIN_MATCH_LEN: usize = 2;

/// Test an incoming message against a `;`-separated trigger expression.
///
/// Phrases are evaluated in declaration order and the first success wins.
/// With `fuzzy_threshold == 0` a phrase matches only when it is byte-for-byte
/// equal to the raw incoming text; the raw phrase is returned. With a
/// positive threshold both sides are normalized and compared by edit
/// distance, position-independent; the normalized phrase is returned. The
/// exact branch deliberately skips normalization — the two branches are not
/// symmetric.
///
/// An empty expression never matches, which is the policy for a bot with no
/// configured trigger.
pub fn match_trigger(message: &str, trigger: &str, fuzzy_threshold: f64) -> Option<String> {
    if trigger.is_empty() {
        return None;
    }

    let normalized_message = (fuzzy_threshold > 0.0).then(|| normalize(message));

    for phrase in trigger.split(';').map(str::trim) {
        match &normalized_message {
            None => {
                if phrase == message {
                    return Some(phrase.to_string());
                }
            }
            Some(message) => {
                let phrase = normalize(phrase);
                if phrase.chars().count() < MIN_MATCH_LEN {
                    continue;
                }
                if best_distance(message, &phrase) <= fuzzy_threshold {
                    return Some(phrase);
                }
            }
        }
    }

    None
}

/// Best normalized Levenshtein distance between two strings, ignoring where
/// in the longer string the shorter one lands: the shorter string is slid
/// over every same-length char window of the longer one, and the whole-string
/// comparison is included so length mismatches still score. 0.0 is a perfect
/// match, 1.0 shares nothing.
fn best_distance(a: &str, b: &str) -> f64 {
    let (needle, haystack) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let needle_chars: Vec<char> = needle.chars().collect();
    let haystack_chars: Vec<char> = haystack.chars().collect();

    if needle_chars.is_empty() {
        return if haystack_chars.is_empty() { 0.0 } else { 1.0 };
    }

    let mut best = 1.0 - strsim::normalized_levenshtein(needle, haystack);
    let window = needle_chars.len();
    for start in 0..=haystack_chars.len().saturating_sub(window) {
        let slice: String = haystack_chars[start..start + window].iter().collect();
        let distance = 1.0 - strsim::normalized_levenshtein(needle, &slice);
        if distance < best {
            best = distance;
        }
    }
    best
}
