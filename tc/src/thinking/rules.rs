//! Deterministic analysis rules
//!
//! Matching is a case-insensitive substring test. Rules are checked in
//! order and the first hit wins.

/// Domain reported when no rule matches
pub const GENERAL_DOMAIN: &str = "general";

/// Question type reported when no rule matches
pub const GENERAL_DIALOGUE: &str = "general dialogue";

/// (needles, domain), checked in order
const DOMAIN_RULES: &[(&[&str], &str)] = &[
    (&["code", "programming", "代码", "编程"], "programming"),
    (&["math", "calculation", "数学", "计算"], "math"),
    (&["weather", "temperature", "天气", "温度"], "weather"),
];

/// (needles, question type), checked in order
const QUESTION_RULES: &[(&[&str], &str)] = &[
    (&["how", "怎么", "如何"], "method guidance"),
    (&["why", "为什么"], "reason explanation"),
    (&["what", "which", "什么", "哪些"], "information query"),
];

/// Tokens never reported as keywords
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from", "i", "if", "in", "is",
    "it", "me", "my", "of", "on", "or", "so", "that", "the", "this", "to", "was", "we", "you", "your", "的", "了",
    "是", "在", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上", "也", "很", "到", "说", "要", "去",
    "你", "会", "着", "没有", "看", "好", "自己", "这",
];

fn first_match(input: &str, rules: &[(&[&str], &'static str)], default: &'static str) -> &'static str {
    let haystack = input.to_lowercase();
    rules
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| haystack.contains(needle)))
        .map(|(_, label)| *label)
        .unwrap_or(default)
}

pub fn is_stop_word(token: &str) -> bool {
    let lowered = token.to_lowercase();
    STOP_WORDS.iter().any(|word| *word == lowered)
}

/// Whitespace tokens longer than one character that are not stop words
///
/// Order is preserved and duplicates are kept.
pub fn extract_keywords(input: &str) -> Vec<String> {
    input
        .split_whitespace()
        .filter(|token| token.chars().count() > 1 && !is_stop_word(token))
        .map(str::to_string)
        .collect()
}

pub fn identify_domain(input: &str) -> &'static str {
    first_match(input, DOMAIN_RULES, GENERAL_DOMAIN)
}

pub fn identify_question_type(input: &str) -> &'static str {
    first_match(input, QUESTION_RULES, GENERAL_DIALOGUE)
}
