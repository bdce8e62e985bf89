//! 分词
//!
//! 小写化，去掉标点（保留字母、数字和下划线），按空白切分，
//! 去掉停用词和长度不超过 2 的词，保持原顺序。

/// 最短保留词长（字符数）
pub const MIN_TOKEN_CHARS: usize = 3;

pub const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "see", "who",
    "did", "get", "let", "say", "she", "too", "use", "that", "with", "have", "this", "will",
    "your", "from", "they", "been", "were", "said", "each", "which", "their", "there", "what",
    "about", "would", "these", "them", "then", "than", "into", "could", "should", "some",
    "when", "where", "while", "also", "just", "only", "very",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// 对文本分词
pub fn tokenize(text: &str) -> Vec<String> {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS && !is_stop_word(token))
        .map(str::to_string)
        .collect()
}
