//! Candidate entity names from free text
//!
//! Pure text processing: the caller supplies the alias table, the extractor never
//! touches the store.

use std::collections::HashSet;

use crate::graph::Alias;

/// Capitalised words that open questions or commands rather than name anything
const NON_ENTITY_WORDS: &[&str] = &[
    "a", "am", "an", "and", "any", "are", "ask", "can", "check", "could", "did", "do", "does",
    "find", "get", "give", "has", "have", "hey", "hi", "how", "i", "i'm", "is", "it", "list",
    "me", "my", "of", "on", "or", "our", "please", "remind", "show", "tell", "the", "to", "was",
    "we", "what", "what's", "when", "where", "where's", "which", "who", "who's", "why", "will",
    "would", "you", "your",
];

/// Phrases that refer to the person asking
const SELF_REFERENCES: &[&str] = &[
    "who am i",
    "my name",
    "i am",
    "i'm",
    "about me",
    "myself",
    "my birthday",
    "my email",
    "my phone",
    "my address",
];

/// One whitespace-separated word with surrounding punctuation and possessives removed
#[derive(Debug)]
struct Word {
    text: String,
    lower: String,
    /// Followed by clause punctuation such as `,` or `?`
    ends_clause: bool,
}

fn split_words(text: &str) -> Vec<Word> {
    text.split_whitespace()
        .filter_map(|raw| {
            let ends_clause = raw.ends_with([',', '.', '?', '!', ';', ':']);
            let trimmed = raw.trim_matches(|c: char| {
                !(c.is_alphanumeric() || c == '\'' || c == '\u{2019}' || c == '-' || c == '_')
            });
            let text = strip_possessive(trimmed);
            if text.is_empty() {
                return None;
            }
            Some(Word {
                lower: text.to_lowercase(),
                text: text.to_string(),
                ends_clause,
            })
        })
        .collect()
}

/// "Janna's" -> "Janna", "James'" -> "James"
pub fn strip_possessive(word: &str) -> &str {
    for suffix in ["'s", "\u{2019}s", "'S"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            return stem;
        }
    }
    word.trim_end_matches(['\'', '\u{2019}'])
        .trim_start_matches(['\'', '\u{2019}'])
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

/// Entity candidate extraction
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    identity_entity: String,
}

impl EntityExtractor {
    /// `identity_entity` is the reserved entity self-references resolve to
    pub fn new(identity_entity: impl Into<String>) -> Self {
        Self {
            identity_entity: identity_entity.into(),
        }
    }

    /// Ordered, case-insensitively deduplicated candidates, most confident first
    pub fn extract(&self, text: &str, aliases: &[Alias]) -> Vec<String> {
        let words = split_words(text);
        let lowered: Vec<&str> = words.iter().map(|w| w.lower.as_str()).collect();

        let mut out = Candidates::default();

        for alias in multi_word_aliases(aliases) {
            if contains_sequence(&lowered, &alias.1) {
                out.push(alias.0);
            }
        }

        for run in capitalized_runs(&words) {
            out.push(&run);
        }

        let padded = format!(" {} ", lowered.join(" ").replace('\u{2019}', "'"));
        if SELF_REFERENCES
            .iter()
            .any(|phrase| padded.contains(&format!(" {} ", phrase)))
        {
            out.push(&self.identity_entity);
        }

        for alias in aliases {
            let alias_lower = alias.alias.trim().to_lowercase();
            if !alias_lower.contains(char::is_whitespace) && lowered.contains(&alias_lower.as_str())
            {
                out.push(&alias.alias);
            }
        }

        out.into_vec()
    }
}

#[derive(Default)]
struct Candidates {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl Candidates {
    fn push(&mut self, candidate: &str) {
        let candidate = candidate.trim();
        if !candidate.is_empty() && self.seen.insert(candidate.to_lowercase()) {
            self.ordered.push(candidate.to_string());
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

/// Multi-word aliases with their lowercase word sequences, longest first
fn multi_word_aliases(aliases: &[Alias]) -> Vec<(&str, Vec<String>)> {
    let mut multi: Vec<(&str, Vec<String>)> = aliases
        .iter()
        .filter_map(|a| {
            let words: Vec<String> = a
                .alias
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect();
            (words.len() > 1).then_some((a.alias.as_str(), words))
        })
        .collect();
    multi.sort_by(|a, b| {
        b.1.len()
            .cmp(&a.1.len())
            .then_with(|| b.0.len().cmp(&a.0.len()))
    });
    multi
}

fn contains_sequence(haystack: &[&str], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|window| window.iter().zip(needle).all(|(a, b)| *a == b.as_str()))
}

/// Runs of consecutive capitalised words, each run joined with single spaces
fn capitalized_runs(words: &[Word]) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for word in words {
        let is_name = is_capitalized(&word.text) && !NON_ENTITY_WORDS.contains(&word.lower.as_str());
        if is_name {
            current.push(&word.text);
        } else if !current.is_empty() {
            runs.push(current.join(" "));
            current.clear();
        }
        if word.ends_clause && !current.is_empty() {
            runs.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        runs.push(current.join(" "));
    }
    runs
}
