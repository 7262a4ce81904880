// vaultchat Engine — Tokenizer
//
// Lowercase word tokens for BM25. Shared by memory recall and lorebook
// activation so both sides of a match are normalized identically.

use crate::atoms::constants::MIN_TOKEN_CHARS;
use std::collections::HashSet;
use std::sync::LazyLock;

// ── Stopwords ──────────────────────────────────────────────────────────────
// Vietnamese function words first, then English. Multi-syllable Vietnamese
// words are split by whitespace before lookup, so only single syllables
// belong here.

const STOPWORDS_VI: &[&str] = &[
    "và", "là", "của", "có", "cho", "với", "các", "những", "một", "này", "đó", "thì",
    "mà", "để", "trong", "khi", "đã", "đang", "sẽ", "được", "bị", "không", "cũng",
    "như", "từ", "theo", "ra", "vào", "lên", "xuống", "rồi", "nên", "nếu", "vì",
    "tôi", "bạn", "anh", "em", "chị", "nó", "họ", "chúng", "ta", "mình", "ấy",
    "gì", "nào", "đây", "kia", "lại", "còn", "rất", "quá", "hơn", "nhất", "thế",
    "vậy", "ở", "tại", "về", "sau", "trước", "hay", "hoặc", "nhưng",
];

const STOPWORDS_EN: &[&str] = &[
    "the", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being",
    "am", "to", "of", "in", "on", "at", "by", "for", "with", "about", "as", "into",
    "from", "up", "down", "out", "off", "over", "under", "it", "its", "this", "that",
    "these", "those", "an", "he", "she", "they", "we", "you", "me", "him", "her",
    "them", "us", "my", "your", "his", "their", "our", "do", "does", "did", "have",
    "has", "had", "not", "no", "so", "if", "then", "than", "too", "very", "can",
    "will", "just", "what", "which", "who", "whom", "when", "where", "why", "how",
    "all", "any", "some", "there", "here",
];

static STOPWORDS: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOPWORDS_VI.iter().chain(STOPWORDS_EN.iter()).copied().collect());

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

// ── Tokenize ───────────────────────────────────────────────────────────────

/// Lowercase, split on anything that is not a Unicode letter or digit, drop
/// short tokens and stopwords. Order and duplicates are preserved.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    normalized
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|t| !is_stopword(t))
        .map(str::to_string)
        .collect()
}
