//! String-similarity scorers for product-name resolution.
//!
//! All scorers return scores on a 0–100 scale so the resolver's
//! thresholds read naturally next to the tuning tables in the config.
//! The full-string scorer is `strsim`'s normalized Levenshtein; the
//! partial and token-set variants are built on top of it:
//!
//! - [`ratio`] — whole-string similarity.
//! - [`partial_ratio`] — best alignment of the shorter string against
//!   same-length windows of the longer, so a product name embedded in a
//!   sentence still scores high.
//! - [`token_set_ratio`] — word-order-insensitive comparison over token
//!   sets, so `"income advantage allianz"` still matches the catalog
//!   spelling.

use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

/// Whole-string similarity in `[0.0, 100.0]`.
///
/// Two empty strings are identical (100); one empty string scores 0.
pub fn ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b) * 100.0
}

/// Best-window similarity in `[0.0, 100.0]`.
///
/// Slides the shorter string across the longer one and returns the best
/// [`ratio`] over all same-length windows. Returns 0 when either input
/// is empty.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    let long_chars: Vec<char> = long.chars().collect();
    let window = short.chars().count();

    let mut best = 0.0f64;
    for start in 0..=(long_chars.len() - window) {
        let candidate: String = long_chars[start..start + window].iter().collect();
        let score = ratio(short, &candidate);
        if score > best {
            best = score;
        }
        if best >= 100.0 {
            break;
        }
    }
    best
}

/// Token-set similarity in `[0.0, 100.0]`.
///
/// Splits both strings into whitespace tokens, then compares the sorted
/// intersection against each side's intersection-plus-remainder string,
/// returning the best pairwise [`ratio`]. Shared tokens dominate, so
/// reordered or partially-overlapping names score high.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 100.0;
    }
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let sect = intersection.join(" ");
    let combined_a = join_nonempty(&sect, &only_a.join(" "));
    let combined_b = join_nonempty(&sect, &only_b.join(" "));

    let mut best = ratio(&combined_a, &combined_b);
    if !sect.is_empty() {
        best = best.max(ratio(&sect, &combined_a));
        best = best.max(ratio(&sect, &combined_b));
    }
    best
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{} {}", head, tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(ratio("thrivent", "thrivent"), 100.0);
        assert_eq!(partial_ratio("thrivent", "thrivent"), 100.0);
        assert_eq!(token_set_ratio("a b c", "c b a"), 100.0);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(ratio("", ""), 100.0);
        assert_eq!(ratio("abc", ""), 0.0);
        assert_eq!(partial_ratio("", "abc"), 0.0);
        assert_eq!(token_set_ratio("", "abc"), 0.0);
    }

    #[test]
    fn partial_finds_embedded_name() {
        let score = partial_ratio(
            "allianz index advantage",
            "tell me about the allianz index advantage product",
        );
        assert!(score >= 99.0, "embedded name should score ~100, got {score}");
    }

    #[test]
    fn partial_is_symmetric_in_argument_order() {
        let a = partial_ratio("choice", "thrivent variable choice");
        let b = partial_ratio("thrivent variable choice", "choice");
        assert_eq!(a, b);
    }

    #[test]
    fn token_set_ignores_word_order() {
        let reordered = token_set_ratio("income advantage allianz", "allianz advantage income");
        assert_eq!(reordered, 100.0);
    }

    #[test]
    fn typo_scores_clear_resolver_thresholds() {
        // The resolver accepts a predicted-name candidate at combined >= 85;
        // a one-character-per-word typo must stay comfortably above that.
        let full = ratio("thrivent variabl choic", "thrivent variable choice");
        let partial = partial_ratio("thrivent variabl choic", "thrivent variable choice");
        let token = token_set_ratio("thrivent variabl choic", "thrivent variable choice");
        assert!(full > 90.0, "full={full}");
        assert!(partial >= 90.0, "partial={partial}");
        assert!(token > 90.0, "token={token}");
    }

    #[test]
    fn unrelated_strings_score_low() {
        assert!(ratio("fixed annuity basics", "jackson market link pro") < 40.0);
        assert!(token_set_ratio("fixed annuity basics", "jackson market link pro") < 40.0);
    }
}
