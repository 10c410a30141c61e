//! Question text helpers: tokenization, light stemming, fuzzy term matching.

use std::collections::HashSet;
use strsim::jaro_winkler;

lazy_static::lazy_static! {
    static ref STOP_WORDS: HashSet<&'static str> = [
        "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "does", "for",
        "from", "give", "how", "i", "in", "is", "it", "list", "many", "me", "much",
        "of", "on", "or", "per", "show", "state", "than", "that", "the", "their",
        "there", "to", "top", "total", "was", "were", "what", "whats", "which",
        "who", "with", "each", "all", "most", "least", "biggest", "largest",
        "highest", "lowest", "smallest", "sum", "count", "number", "nc", "north",
        "carolina", "fiscal",
    ]
    .into_iter()
    .collect();
}

/// Minimum Jaro-Winkler similarity for two different terms to count as a match
pub const FUZZY_THRESHOLD: f64 = 0.92;

/// Lowercase, strip punctuation, fold plurals and -ing forms
pub fn normalize_term(word: &str) -> String {
    let w: String = word
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();

    if w.len() > 4 && w.ends_with("ies") {
        return format!("{}y", &w[..w.len() - 3]);
    }
    if w.len() > 5 && w.ends_with("ing") {
        return w[..w.len() - 3].to_string();
    }
    if w.len() > 4 && w.ends_with("sses") {
        return w[..w.len() - 2].to_string();
    }
    if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
        return w[..w.len() - 1].to_string();
    }
    w
}

/// All normalized terms of a phrase, stop words included
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(normalize_term)
        .filter(|w| !w.is_empty())
        .collect()
}

/// Normalized terms with stop words and bare numbers removed
pub fn keywords(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .filter(|w| !STOP_WORDS.contains(w.to_lowercase().as_str()))
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .map(normalize_term)
        .filter(|w| !w.is_empty())
        .collect()
}

/// Parts of an identifier such as `agency_description`
pub fn identifier_terms(identifier: &str) -> Vec<String> {
    identifier
        .split('_')
        .filter(|p| !p.is_empty())
        .map(normalize_term)
        .collect()
}

/// Similarity of two normalized terms in `0.0..=1.0`
pub fn term_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let jw = jaro_winkler(a, b);
    if jw >= FUZZY_THRESHOLD {
        return jw;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.len() >= 4 && long.starts_with(short) {
        return 0.8;
    }
    0.0
}

/// Best similarity of `term` against any candidate
pub fn best_similarity<'a>(term: &str, candidates: impl IntoIterator<Item = &'a String>) -> f64 {
    candidates
        .into_iter()
        .map(|c| term_similarity(term, c))
        .fold(0.0, f64::max)
}
