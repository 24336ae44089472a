//! Query vocabulary to fact keys
//!
//! Rules are checked in table order; the longest matching phrase wins and ties go
//! to the earlier rule.

/// Built-in keyword table: fact key and the phrases that ask for it
const BUILTIN_RULES: &[(&str, &[&str])] = &[
    ("birthday", &["birthday", "born", "date of birth", "birth date", "bday"]),
    ("phone", &["phone", "phone number", "number", "cell", "mobile", "telephone", "call"]),
    ("email", &["email", "e mail", "email address", "mail address"]),
    ("address", &["address", "home address", "street", "postal address"]),
    ("relationship", &["relationship", "related to", "married to", "spouse", "partner"]),
    ("role", &["role", "job", "position", "occupation", "works as", "job title"]),
    ("full_name", &["full name", "real name", "legal name", "last name", "surname"]),
    ("name", &["name", "called"]),
    ("url", &["url", "link", "website", "homepage", "web address"]),
    ("stack", &["stack", "tech stack", "built with", "written in", "framework"]),
    ("runs_on", &["port", "run on", "runs on", "running on", "listen on", "listens on"]),
    ("lives_in", &["live", "lives", "living", "reside", "resides"]),
    ("hosted_on", &["hosted", "hosted on", "deployed", "deployed on", "which server"]),
    ("hosts", &["what runs on", "what is running on", "services on"]),
    ("timezone", &["timezone", "time zone"]),
    ("owns", &["owner", "owns", "maintainer", "maintains", "responsible for"]),
    ("domain", &["domain", "hostname", "dns"]),
    ("uses", &["uses", "depends on", "dependency", "dependencies"]),
];

/// Lowercase, keep letters and digits, collapse everything else to single spaces
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
struct IntentRule {
    key: String,
    phrases: Vec<String>,
}

/// Intent extraction over an ordered keyword table
#[derive(Debug, Clone)]
pub struct IntentExtractor {
    rules: Vec<IntentRule>,
}

impl Default for IntentExtractor {
    fn default() -> Self {
        Self {
            rules: BUILTIN_RULES
                .iter()
                .map(|(key, phrases)| IntentRule {
                    key: key.to_string(),
                    phrases: phrases.iter().map(|p| normalize(p)).collect(),
                })
                .collect(),
        }
    }
}

impl IntentExtractor {
    /// Append a domain-specific rule after the built-in ones
    pub fn with_rule(mut self, key: impl Into<String>, phrases: &[&str]) -> Self {
        self.rules.push(IntentRule {
            key: key.into(),
            phrases: phrases.iter().map(|p| normalize(p)).collect(),
        });
        self
    }

    /// The fact key the text asks for, if any
    pub fn extract(&self, text: &str) -> Option<&str> {
        let padded = format!(" {} ", normalize(text));
        let mut best: Option<(usize, &str)> = None;

        for rule in &self.rules {
            for phrase in &rule.phrases {
                if phrase.is_empty() || !padded.contains(&format!(" {} ", phrase)) {
                    continue;
                }
                if best.is_none_or(|(len, _)| phrase.len() > len) {
                    best = Some((phrase.len(), rule.key.as_str()));
                }
            }
        }

        best.map(|(_, key)| key)
    }

    /// Every key the table can produce, in table order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.key.as_str())
    }
}
