//! Precision gate applied after the cascade
//!
//! Low-confidence hits only survive next to a confident entity match. A query that
//! never hits the graph yields nothing rather than loose full-text guesses.

use super::types::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultFilter {
    /// Scores at or above this are entity matches and always pass the gate
    pub entity_match_threshold: u8,
    /// Nothing below this passes
    pub min_score: u8,
}

impl ResultFilter {
    pub fn new(entity_match_threshold: u8, min_score: u8) -> Self {
        Self {
            entity_match_threshold,
            min_score,
        }
    }

    pub fn apply(&self, results: Vec<SearchResult>) -> Vec<SearchResult> {
        let corroborated = results
            .iter()
            .any(|r| r.score >= self.entity_match_threshold && r.score >= self.min_score);

        results
            .into_iter()
            .filter(|r| r.score >= self.min_score)
            .filter(|r| corroborated || r.score >= self.entity_match_threshold)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::{Phase, SourceTable};

    fn result(score: u8, phase: Phase) -> SearchResult {
        SearchResult {
            entity: None,
            subject: "E".to_string(),
            answer: format!("answer {}", score),
            source: SourceTable::Facts,
            score,
            phase,
            row_id: score as i64,
            activation: 0.0,
            importance: 0.5,
        }
    }

    #[test]
    fn test_fts_only_results_are_discarded() {
        let filter = ResultFilter::new(65, 40);
        let kept = filter.apply(vec![result(50, Phase::FactText), result(40, Phase::RelationText)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_corroborated_results_pass() {
        let filter = ResultFilter::new(65, 40);
        let kept = filter.apply(vec![
            result(95, Phase::EntityIntent),
            result(50, Phase::FactText),
            result(40, Phase::RelationText),
        ]);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_min_score_applies_to_everything() {
        let filter = ResultFilter::new(65, 45);
        let kept = filter.apply(vec![result(70, Phase::Entity), result(40, Phase::RelationText)]);
        assert_eq!(kept.iter().map(|r| r.score).collect::<Vec<_>>(), vec![70]);
    }

    #[test]
    fn test_entity_matches_pass_alone() {
        let filter = ResultFilter::new(65, 40);
        let kept = filter.apply(vec![result(65, Phase::Entity)]);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_strict_min_score_can_remove_the_corroborating_hit() {
        let filter = ResultFilter::new(65, 90);
        let kept = filter.apply(vec![result(70, Phase::Entity), result(50, Phase::FactText)]);
        assert!(kept.is_empty());
    }
}
