//! Host-runtime integration
//!
//! The host strips earlier injected context from the user's message, bounds the
//! lookup by wall-clock time and turns accepted results into a context block.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::SearchEngine;
use crate::error::Error;
use crate::graph::GraphRepository;
use crate::search::SearchResult;

pub const CONTEXT_OPEN_TAG: &str = "<graph-memory>";
pub const CONTEXT_CLOSE_TAG: &str = "</graph-memory>";

/// Remove every `<graph-memory>` block this engine injected earlier
///
/// An unterminated block is dropped to the end of the message.
pub fn strip_injected_context(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;

    while let Some(start) = rest.find(CONTEXT_OPEN_TAG) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + CONTEXT_OPEN_TAG.len()..];
        match after_open.find(CONTEXT_CLOSE_TAG) {
            Some(end) => rest = &after_open[end + CONTEXT_CLOSE_TAG.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Look up context for a user message under a hard timeout
///
/// Timeouts and failures read as "no results" so a lookup can never fail the turn.
pub async fn recall<R: GraphRepository>(
    engine: &SearchEngine<R>,
    message: &str,
    top_k: usize,
    min_score: u8,
    timeout: Duration,
) -> Vec<SearchResult> {
    let query = strip_injected_context(message);
    if query.is_empty() {
        return Vec::new();
    }

    match tokio::time::timeout(timeout, engine.search(&query, top_k, min_score)).await {
        Ok(results) => results,
        Err(_) => {
            let err = Error::Timeout(timeout.as_millis() as u64);
            warn!(code = err.code(), error = %err, "Graph lookup abandoned");
            Vec::new()
        }
    }
}

/// Render accepted results as a context block, grouped by entity in result order
///
/// Duplicate answers within an entity are dropped. Lines that would push the block
/// past `max_chars` are left out; returns `None` when nothing fits.
pub fn format_context_block(results: &[SearchResult], max_chars: usize) -> Option<String> {
    let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for result in results {
        let entity = result.group_key();
        if !seen.insert((entity.to_lowercase(), result.answer.to_lowercase())) {
            continue;
        }
        match groups.iter_mut().find(|(name, _)| name.eq_ignore_ascii_case(entity)) {
            Some((_, answers)) => answers.push(&result.answer),
            None => groups.push((entity, vec![&result.answer])),
        }
    }

    let frame = CONTEXT_OPEN_TAG.len() + CONTEXT_CLOSE_TAG.len() + 2;
    let mut body = String::new();
    let mut written = 0;

    'groups: for (entity, answers) in &groups {
        let header = format!("{}:\n", entity);
        let mut section = String::new();
        for answer in answers {
            let line = format!("- {}\n", answer);
            if frame + body.len() + header.len() + section.len() + line.len() > max_chars {
                if !section.is_empty() {
                    body.push_str(&header);
                    body.push_str(&section);
                }
                debug!(written, total = results.len(), "Context block truncated");
                break 'groups;
            }
            section.push_str(&line);
            written += 1;
        }
        body.push_str(&header);
        body.push_str(&section);
    }

    if body.is_empty() {
        return None;
    }
    Some(format!("{}\n{}{}", CONTEXT_OPEN_TAG, body, CONTEXT_CLOSE_TAG))
}
