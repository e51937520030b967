// src/ingest/keywords.rs
//! Deterministic, stopword-filtered keyword extraction. Runs once per signal
//! at ingestion; nothing downstream re-tokenizes content.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};

const MIN_TOKEN_CHARS: usize = 3;
const MAX_TOKEN_CHARS: usize = 40;
const MAX_KEYWORDS: usize = 24;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?u)\b[\w][\w+#.\-]*[\w+#]|\b\w\b").expect("keyword regex"));

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
        "any", "are", "aren't", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "don't",
        "down", "during", "each", "even", "ever", "every", "few", "for", "from", "further", "get",
        "gets", "got", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his",
        "how", "i", "i'm", "if", "in", "into", "is", "isn't", "it", "it's", "its", "just", "let",
        "like", "made", "make", "many", "me", "more", "most", "much", "must", "my", "new", "no",
        "nor", "not", "now", "of", "off", "on", "once", "one", "only", "or", "other", "our",
        "ours", "out", "over", "own", "really", "same", "see", "she", "should", "show", "so",
        "some", "still", "such", "than", "that", "the", "their", "theirs", "them", "then",
        "there", "these", "they", "thing", "things", "this", "those", "through", "to", "too",
        "under", "until", "up", "use", "used", "using", "very", "via", "want", "was", "way", "we",
        "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
        "would", "yet", "you", "your", "yours", "ask", "anyone", "help", "need", "question",
        "best", "good", "better", "know", "think", "does", "tried", "try", "http", "https",
        "www", "com",
    ]
    .into_iter()
    .collect()
});

/// Lowercased keyword set for `content`.
///
/// Tokens keep inner `+ # . -` so "c++", "c#", "node.js" and "next-js" survive.
/// Pure numbers, stopwords and tokens shorter than 3 chars are dropped. When a
/// text yields more than the cap, the first-seen tokens win.
pub fn extract_keywords(content: &str) -> BTreeSet<String> {
    let lower = content.to_lowercase();
    let mut out = BTreeSet::new();
    for m in TOKEN_RE.find_iter(&lower) {
        let tok = m.as_str().trim_end_matches(['.', '-']);
        let n = tok.chars().count();
        if !(MIN_TOKEN_CHARS..=MAX_TOKEN_CHARS).contains(&n) {
            continue;
        }
        if tok.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-') {
            continue;
        }
        if STOPWORDS.contains(tok) {
            continue;
        }
        out.insert(tok.to_string());
        if out.len() >= MAX_KEYWORDS {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(s: &str) -> Vec<String> {
        extract_keywords(s).into_iter().collect()
    }

    #[test]
    fn drops_stopwords_and_short_tokens() {
        assert_eq!(kw("The state of Rust in 2024 is great"), vec!["great", "rust", "state"]);
    }

    #[test]
    fn keeps_language_names_with_symbols() {
        let k = extract_keywords("Moving from C++ and C# to Node.js");
        assert!(k.contains("c++"));
        assert!(k.contains("node.js"));
        assert!(k.contains("moving"));
    }

    #[test]
    fn is_deterministic_and_case_insensitive() {
        let a = extract_keywords("WebAssembly WASM runtime, webassembly!");
        let b = extract_keywords("webassembly wasm Runtime");
        assert_eq!(a, b);
    }

    #[test]
    fn numbers_are_not_keywords() {
        assert!(extract_keywords("100 200 3.14 2024-01-01").is_empty());
    }
}
