//! Tokenization shared by the lexical index, the BM25 ranker and the query
//! analyzers. All three must agree on what a token is.

/// Words that never become index terms or query keywords.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
    "should", "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having", "i", "me", "my",
    "we", "our", "you", "your", "she", "her", "him", "his", "about", "were", "been", "any", "all", "show", "find",
    "tell", "get", "us",
];

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Lowercases character by character, leaving a character untouched when its
/// lowercase form has a different UTF-8 length. Byte offsets in the folded
/// string therefore line up with the original.
pub fn fold_case(text: &str) -> String {
    text.chars()
        .map(|c| {
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(l), None) if l.len_utf8() == c.len_utf8() => l,
                _ => c,
            }
        })
        .collect()
}

/// Every alphanumeric run, case-folded, stop words included.
pub fn raw_tokens(text: &str) -> Vec<String> {
    fold_case(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Index/query terms: case-folded, stop words and single letters removed.
pub fn tokenize(text: &str) -> Vec<String> {
    raw_tokens(text)
        .into_iter()
        .filter(|t| (t.chars().count() > 1 || t.chars().all(|c| c.is_ascii_digit())) && !is_stop_word(t))
        .collect()
}

/// Tokens deduplicated in first-seen order.
pub fn unique_tokens(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text).into_iter().filter(|t| seen.insert(t.clone())).collect()
}

/// Largest char boundary at or below `index`.
pub fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Smallest char boundary at or above `index`.
pub fn ceil_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// A whitespace-trimmed excerpt of `text` around `[start, end)` with
/// `radius` bytes of context on each side.
pub fn snippet(text: &str, start: usize, end: usize, radius: usize) -> String {
    let from = floor_boundary(text, start.saturating_sub(radius));
    let to = ceil_boundary(text, end.saturating_add(radius));
    let mut out = String::new();
    if from > 0 {
        out.push_str("...");
    }
    out.push_str(text[from..to].trim());
    if to < text.len() {
        out.push_str("...");
    }
    out
}

/// Jaccard similarity of two term sets; 0.0 when both are empty.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_stop_words_and_punctuation() {
        assert_eq!(tokenize("What did I say about the Q3 budget?"), vec!["say", "q3", "budget"]);
    }

    #[test]
    fn fold_case_preserves_byte_offsets() {
        let s = "İstanbul Café";
        assert_eq!(fold_case(s).len(), s.len());
        assert!(fold_case(s).ends_with("café"));
    }

    #[test]
    fn snippet_respects_char_boundaries() {
        let s = "ééééé smoothie ééééé";
        let start = s.find("smoothie").expect("present");
        let snip = snippet(s, start, start + 8, 3);
        assert!(snip.contains("smoothie"));
    }

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        let a = vec!["budget".to_string()];
        let b = vec!["lunch".to_string()];
        assert!(jaccard(&a, &b).abs() < f64::EPSILON);
        assert!((jaccard(&a, &a) - 1.0).abs() < f64::EPSILON);
    }
}
