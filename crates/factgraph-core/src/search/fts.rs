//! Safe FTS5 MATCH expressions from user text
//!
//! Only `[A-Za-z0-9_]` runs survive tokenisation and every token is emitted as a
//! quoted literal, so quotes, `*`, `^`, parentheses and the operator words
//! `AND`/`OR`/`NOT`/`NEAR` can never become FTS syntax.

use std::collections::HashSet;

/// Words too common to be worth a full-text hit
const STOP_WORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "any", "are", "as", "at", "be", "but", "by", "can",
    "could", "did", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in",
    "into", "is", "it", "its", "know", "me", "my", "of", "on", "or", "our", "s", "should", "so",
    "t", "tell", "than", "that", "the", "their", "them", "then", "there", "these", "they",
    "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "whom", "why",
    "will", "with", "would", "you", "your",
];

/// Lowercase word tokens worth searching for, in order of first appearance
pub fn tokenize(text: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut seen = HashSet::new();

    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty() && !stop.contains(token))
        .filter(|token| seen.insert(token.to_string()))
        .map(str::to_string)
        .collect()
}

/// Quote a single term as an FTS5 string literal
pub fn escape_term(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

/// OR-joined MATCH expression; empty when nothing searchable remains
pub fn build_match_query(text: &str) -> String {
    tokenize(text)
        .iter()
        .map(|token| escape_term(token))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_stop_words_and_syntax() {
        assert_eq!(
            tokenize("What port does Keystone run on?"),
            vec!["port", "keystone", "run"]
        );
        assert_eq!(tokenize("\"quoted\" (paren) star* ^caret"), vec![
            "quoted", "paren", "star", "caret"
        ]);
    }

    #[test]
    fn test_tokenize_deduplicates() {
        assert_eq!(tokenize("port PORT Port 3055"), vec!["port", "3055"]);
    }

    #[test]
    fn test_operator_words_are_quoted() {
        let query = build_match_query("cats NOT dogs NEAR birds");
        assert_eq!(query, "\"cats\" OR \"not\" OR \"dogs\" OR \"near\" OR \"birds\"");
    }

    #[test]
    fn test_possessive_leaves_no_stray_token() {
        assert_eq!(build_match_query("Mama's phone"), "\"mama\" OR \"phone\"");
    }

    #[test]
    fn test_nothing_searchable() {
        assert_eq!(build_match_query("what is the"), "");
        assert_eq!(build_match_query("?!*()"), "");
    }

    #[test]
    fn test_escape_term_doubles_quotes() {
        assert_eq!(escape_term("a\"b"), "\"a\"\"b\"");
    }
}
