//! String similarity primitives.
//!
//! All functions operate on chars, not bytes, and expect callers to have
//! already lowercased their inputs. Every score lies in `[0.0, 1.0]`.

/// Common-prefix length that earns the Winkler bonus is capped here.
const MAX_PREFIX_BONUS_CHARS: usize = 4;

/// Jaro base score at which the prefix bonus starts to apply.
const PREFIX_BONUS_THRESHOLD: f64 = 0.7;

/// Best-match score a query token needs to count as matched.
pub const TOKEN_MATCH_THRESHOLD: f64 = 0.5;

/// Levenshtein distance with unit costs, computed over two rolling rows.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let n = b_chars.len();

    if a_chars.is_empty() {
        return n;
    }
    if n == 0 {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for (i, &ac) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for j in 1..=n {
            let cost = if ac == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// `1 - distance / longer_len`. Both empty is a perfect match, one empty is none.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    match (len_a, len_b) {
        (0, 0) => 1.0,
        (0, _) | (_, 0) => 0.0,
        _ => {
            let longest = len_a.max(len_b) as f64;
            1.0 - edit_distance(a, b) as f64 / longest
        }
    }
}

/// Jaro-Winkler similarity.
///
/// Matching chars must sit within `max(len)/2 - 1` positions of each other.
/// The Winkler prefix bonus is only granted once the Jaro base reaches 0.7.
pub fn affine_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let len_a = a_chars.len();
    let len_b = b_chars.len();

    if len_a == 0 || len_b == 0 {
        return 0.0;
    }

    let window = (len_a.max(len_b) / 2).saturating_sub(1);
    let mut a_matched = vec![false; len_a];
    let mut b_matched = vec![false; len_b];
    let mut matches = 0usize;

    for (i, &ac) in a_chars.iter().enumerate() {
        let start = i.saturating_sub(window);
        let end = (i + window + 1).min(len_b);
        for j in start..end {
            if b_matched[j] || b_chars[j] != ac {
                continue;
            }
            a_matched[i] = true;
            b_matched[j] = true;
            matches += 1;
            break;
        }
    }

    if matches == 0 {
        return 0.0;
    }

    // Matched chars that appear out of order, paired up in sequence
    let mut transpositions = 0usize;
    let mut k = 0usize;
    for (i, &ac) in a_chars.iter().enumerate() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[k] {
            k += 1;
        }
        if ac != b_chars[k] {
            transpositions += 1;
        }
        k += 1;
    }

    let m = matches as f64;
    let jaro = (m / len_a as f64
        + m / len_b as f64
        + (matches - transpositions / 2) as f64 / m)
        / 3.0;

    if jaro < PREFIX_BONUS_THRESHOLD {
        return jaro;
    }

    let prefix = a_chars
        .iter()
        .zip(b_chars.iter())
        .take(MAX_PREFIX_BONUS_CHARS)
        .take_while(|(x, y)| x == y)
        .count();

    (jaro + 0.1 * prefix as f64 * (1.0 - jaro)).min(1.0)
}

/// Literal containment score, weighted by where the match starts.
///
/// `len(query) / len(text)`, multiplied by 1.5 for a match at the start or
/// 1.2 for one in the first third, then capped at 1.0.
pub fn substring_score(query: &str, text: &str) -> f64 {
    if query.is_empty() || text.is_empty() {
        return if query.is_empty() && text.is_empty() { 1.0 } else { 0.0 };
    }

    let Some(byte_idx) = text.find(query) else {
        return 0.0;
    };

    let text_len = text.chars().count();
    let query_len = query.chars().count();
    let char_idx = text[..byte_idx].chars().count();

    let position_weight = if char_idx == 0 {
        1.5
    } else if char_idx < text_len / 3 {
        1.2
    } else {
        1.0
    };

    (query_len as f64 / text_len as f64 * position_weight).min(1.0)
}

/// Multi-word matching: every query token is paired with its closest text token.
///
/// Tokens whose best score reaches `TOKEN_MATCH_THRESHOLD` count as matched.
/// The result is the mean matched score scaled by the matched fraction of the
/// query, so missing words pull the score down.
pub fn token_overlap(query: &str, text: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let text_lower = text.to_lowercase();
    let query_tokens: Vec<&str> = query_lower.split_whitespace().collect();
    let text_tokens: Vec<&str> = text_lower.split_whitespace().collect();

    if query_tokens.is_empty() || text_tokens.is_empty() {
        return 0.0;
    }

    let mut matched = 0usize;
    let mut total = 0.0;
    for qt in &query_tokens {
        let best = text_tokens
            .iter()
            .map(|tt| affine_similarity(qt, tt))
            .fold(0.0_f64, f64::max);
        if best >= TOKEN_MATCH_THRESHOLD {
            total += best;
            matched += 1;
        }
    }

    if matched == 0 {
        return 0.0;
    }

    (total / matched as f64) * (matched as f64 / query_tokens.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    // ── edit distance ────────────────────────────────────────────

    #[test]
    fn test_edit_distance_basic() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("hello", "hello"), 0);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("abc", ""), 3);
    }

    #[test]
    fn test_edit_distance_counts_chars_not_bytes() {
        assert_eq!(edit_distance("café", "cafe"), 1);
        assert_eq!(edit_distance("日本語", "日本"), 1);
    }

    #[test]
    fn test_edit_similarity_edges() {
        assert_eq!(edit_similarity("", ""), 1.0);
        assert_eq!(edit_similarity("", "a"), 0.0);
        assert_eq!(edit_similarity("a", ""), 0.0);
        assert_eq!(edit_similarity("same", "same"), 1.0);
        assert!(approx(edit_similarity("kitten", "sitting"), 1.0 - 3.0 / 7.0));
    }

    // ── affine (Jaro-Winkler) ────────────────────────────────────

    #[test]
    fn test_affine_classic_pairs() {
        assert!(approx(affine_similarity("martha", "marhta"), 0.961));
        assert!(approx(affine_similarity("dwayne", "duane"), 0.84));
        assert!(approx(affine_similarity("dixon", "dicksonx"), 0.813));
    }

    #[test]
    fn test_affine_edges() {
        assert_eq!(affine_similarity("", ""), 1.0);
        assert_eq!(affine_similarity("abc", ""), 0.0);
        assert_eq!(affine_similarity("", "abc"), 0.0);
        assert_eq!(affine_similarity("github", "github"), 1.0);
        assert_eq!(affine_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_affine_no_prefix_bonus_below_threshold() {
        // "ab" vs "ac": window 0, one match, jaro = (0.5 + 0.5 + 1) / 3 < 0.7
        let score = affine_similarity("ab", "ac");
        assert!(approx(score, 2.0 / 3.0));
    }

    #[test]
    fn test_affine_symmetric_for_typos() {
        let a = affine_similarity("githb", "github");
        let b = affine_similarity("github", "githb");
        assert!(approx(a, b));
        assert!(a > 0.9);
    }

    // ── substring ────────────────────────────────────────────────

    #[test]
    fn test_substring_position_weights() {
        // Start of text: 3/10 * 1.5
        assert!(approx(substring_score("abc", "abcdefghij"), 0.45));
        // Within first third (index 1 < 10/3): 3/10 * 1.2
        assert!(approx(substring_score("bcd", "abcdefghij"), 0.36));
        // Later: 3/10 * 1.0
        assert!(approx(substring_score("hij", "abcdefghij"), 0.3));
    }

    #[test]
    fn test_substring_capped_and_missing() {
        assert_eq!(substring_score("github", "github"), 1.0);
        assert_eq!(substring_score("xyz", "abcdef"), 0.0);
        assert_eq!(substring_score("", "abc"), 0.0);
        assert_eq!(substring_score("abc", ""), 0.0);
        assert_eq!(substring_score("", ""), 1.0);
    }

    #[test]
    fn test_substring_uses_char_positions() {
        // "é" is two bytes; the match still starts at char index 1
        let score = substring_score("bc", "ébcdefghi");
        assert!(approx(score, 2.0 / 9.0 * 1.2));
    }

    // ── token overlap ────────────────────────────────────────────

    #[test]
    fn test_token_overlap_full_match() {
        assert!(approx(token_overlap("rust book", "The Rust Book"), 1.0));
    }

    #[test]
    fn test_token_overlap_partial_penalized() {
        let full = token_overlap("rust book", "rust book online");
        let partial = token_overlap("rust qqqqqqqq", "rust book online");
        assert!(partial < full);
        assert!(approx(partial, 0.5));
    }

    #[test]
    fn test_token_overlap_empty_and_unmatched() {
        assert_eq!(token_overlap("", "anything"), 0.0);
        assert_eq!(token_overlap("   ", "anything"), 0.0);
        assert_eq!(token_overlap("query", ""), 0.0);
        assert_eq!(token_overlap("zzz", "abc def"), 0.0);
    }

    #[test]
    fn test_all_scores_bounded() {
        let pairs = [
            ("github", "https://github.com"),
            ("g", "go"),
            ("programming", "the go programming language"),
            ("日本", "日本語のページ"),
            ("x", "x"),
        ];
        for (a, b) in pairs {
            for s in [
                edit_similarity(a, b),
                affine_similarity(a, b),
                substring_score(a, b),
                token_overlap(a, b),
            ] {
                assert!((0.0..=1.0).contains(&s), "{} vs {} scored {}", a, b, s);
            }
        }
    }
}
