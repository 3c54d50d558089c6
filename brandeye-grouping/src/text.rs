//! Text normalization and string similarity used for brand matching

/// Lowercase, replace every non-alphanumeric character with a space, collapse runs of
/// whitespace. "Head & Shoulders®" becomes "head shoulders".
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Levenshtein distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - levenshtein / max_len`, in [0, 1]. Two empty strings score 0.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    let dist = levenshtein(a, b);
    // (max_len - dist) / max_len keeps exact ratios like 3/5 bit-identical to 0.6
    (max_len - dist) as f64 / max_len as f64
}

/// Similarity of an already-normalized token against an already-normalized alias.
///
/// The whole token is compared, and so is every contiguous window of the token's
/// words that has as many words as the alias; the best score wins. This lets
/// "kotex soft" match the alias "kotex" fully.
pub fn token_alias_similarity(token: &str, alias: &str) -> f64 {
    if token.is_empty() || alias.is_empty() {
        return 0.0;
    }
    let mut best = edit_similarity(token, alias);
    if best >= 1.0 {
        return best;
    }

    let words: Vec<&str> = token.split(' ').collect();
    let width = alias.split(' ').count();
    if width < words.len() {
        for window in words.windows(width) {
            let candidate = window.join(" ");
            let score = edit_similarity(&candidate, alias);
            if score > best {
                best = score;
                if best >= 1.0 {
                    break;
                }
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("KOTEX"), "kotex");
        assert_eq!(normalize_text("  Kotex®  Ultra!! "), "kotex ultra");
        assert_eq!(normalize_text("Head & Shoulders"), "head shoulders");
        assert_eq!(normalize_text("---"), "");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn test_normalize_case_round_trip() {
        assert_eq!(normalize_text("KOTEX"), normalize_text("kotex"));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("molto", "melta"), 2);
    }

    #[test]
    fn test_edit_similarity_exact_ratio() {
        // 2 edits over 5 chars is exactly the default threshold
        assert_eq!(edit_similarity("molto", "melta"), 0.6);
        assert_eq!(edit_similarity("tide", "tide"), 1.0);
        assert_eq!(edit_similarity("", ""), 0.0);
    }

    #[test]
    fn test_token_alias_similarity_windows() {
        assert_eq!(token_alias_similarity("kotex soft", "kotex"), 1.0);
        assert_eq!(token_alias_similarity("new head shoulders shampoo", "head shoulders"), 1.0);
        assert!(token_alias_similarity("soft", "kotex") < 0.6);
        assert_eq!(token_alias_similarity("", "kotex"), 0.0);
    }
}
