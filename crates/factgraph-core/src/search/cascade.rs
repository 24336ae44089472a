//! Four-phase retrieval cascade
//!
//! 1. Resolved entity + intent key: exact or contained key/predicate lookups.
//! 2. Resolved entity whose phase 1 came up empty: everything about it.
//! 3. Full-text search over facts, while fewer than `top_k` results are collected.
//! 4. Full-text search over relations, under the same condition.
//!
//! Phase order is the primary sort key and is never overridden by score.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::graph::{Fact, GraphRepository, Relation};

use super::alias::AliasResolver;
use super::entities::EntityExtractor;
use super::fts::build_match_query;
use super::intent::IntentExtractor;
use super::types::{Phase, SearchResult, SourceTable};

/// Phase 1: fact key equals the intent
pub const SCORE_EXACT_KEY: u8 = 95;
/// Phase 1: relation predicate equals the intent
pub const SCORE_EXACT_PREDICATE: u8 = 93;
/// Phase 1: key or predicate contains the intent
pub const SCORE_PARTIAL_KEY: u8 = 90;
/// Phase 2 scores by row kind
pub const SCORE_ENTITY_FACT: u8 = 70;
pub const SCORE_OUTGOING_RELATION: u8 = 68;
pub const SCORE_INCOMING_RELATION: u8 = 65;
/// Phase 3
pub const SCORE_FACT_TEXT: u8 = 50;
/// Phase 4
pub const SCORE_RELATION_TEXT: u8 = 40;

/// Everything one cascade run found, before filtering
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeOutcome {
    /// Resolved canonical entities, in candidate order
    pub entities: Vec<String>,
    pub intent: Option<String>,
    /// Sorted by phase, then activation, importance and score
    pub results: Vec<SearchResult>,
}

/// Results deduplicated by (table, row id); the first phase to find a row keeps it
#[derive(Default)]
struct Collector {
    seen: HashSet<(SourceTable, i64)>,
    results: Vec<SearchResult>,
}

impl Collector {
    fn push(&mut self, result: SearchResult) {
        if self.seen.insert((result.source, result.row_id)) {
            self.results.push(result);
        }
    }

    fn len(&self) -> usize {
        self.results.len()
    }
}

fn compare(a: &SearchResult, b: &SearchResult) -> Ordering {
    a.phase
        .cmp(&b.phase)
        .then_with(|| b.activation.total_cmp(&a.activation))
        .then_with(|| b.importance.total_cmp(&a.importance))
        .then_with(|| b.score.cmp(&a.score))
}

fn fact_line(fact: &Fact) -> String {
    format!("{}: {}", fact.key, fact.value)
}

fn relation_triple(relation: &Relation) -> String {
    format!("{} {} {}", relation.subject, relation.predicate, relation.object)
}

pub struct SearchCascade<R: GraphRepository> {
    repo: Arc<R>,
    resolver: AliasResolver<R>,
    entities: EntityExtractor,
    intents: IntentExtractor,
    fts_limit: u32,
}

impl<R: GraphRepository> SearchCascade<R> {
    pub fn new(repo: Arc<R>, entities: EntityExtractor, intents: IntentExtractor, fts_limit: u32) -> Self {
        Self {
            resolver: AliasResolver::new(Arc::clone(&repo)),
            repo,
            entities,
            intents,
            fts_limit,
        }
    }

    /// Run every applicable phase for `query`
    pub async fn run(&self, query: &str, top_k: usize) -> Result<CascadeOutcome> {
        let aliases = self.repo.list_aliases().await?;
        let candidates = self.entities.extract(query, &aliases);
        let intent = self.intents.extract(query).map(str::to_string);

        let mut entities: Vec<String> = Vec::new();
        let mut seen_entities = HashSet::new();
        for candidate in &candidates {
            let resolution = self.resolver.resolve_run(candidate).await?;
            for entity in resolution.entities() {
                if seen_entities.insert(entity.to_lowercase()) {
                    entities.push(entity.clone());
                }
            }
        }

        debug!(
            query = %query,
            candidates = ?candidates,
            entities = ?entities,
            intent = ?intent,
            "Cascade inputs"
        );

        let mut collector = Collector::default();
        for entity in &entities {
            let found = match intent.as_deref() {
                Some(key) => self.entity_intent_phase(entity, key, &mut collector).await?,
                None => 0,
            };
            if found == 0 {
                self.entity_phase(entity, &mut collector).await?;
            }
        }

        if collector.len() < top_k {
            let match_expr = build_match_query(query);
            if !match_expr.is_empty() {
                for fact in self.repo.search_facts(&match_expr, self.fts_limit).await? {
                    collector.push(SearchResult::from_fact(
                        &fact,
                        fact_line(&fact),
                        None,
                        Phase::FactText,
                        SCORE_FACT_TEXT,
                    ));
                }
                debug!(phase = 3, total = collector.len(), "Fact text phase done");

                if collector.len() < top_k {
                    for relation in self.repo.search_relations(&match_expr, self.fts_limit).await? {
                        collector.push(SearchResult::from_relation(
                            &relation,
                            relation_triple(&relation),
                            None,
                            Phase::RelationText,
                            SCORE_RELATION_TEXT,
                        ));
                    }
                    debug!(phase = 4, total = collector.len(), "Relation text phase done");
                }
            }
        }

        let mut results = collector.results;
        results.sort_by(compare);

        Ok(CascadeOutcome {
            entities,
            intent,
            results,
        })
    }

    /// Phase 1; returns the number of rows the store matched
    async fn entity_intent_phase(
        &self,
        entity: &str,
        key: &str,
        collector: &mut Collector,
    ) -> Result<usize> {
        let facts = self.repo.facts_matching_key(entity, key).await?;
        let relations = self.repo.relations_matching_predicate(entity, key).await?;

        for fact in &facts {
            let score = if fact.key == key {
                SCORE_EXACT_KEY
            } else {
                SCORE_PARTIAL_KEY
            };
            collector.push(SearchResult::from_fact(
                fact,
                fact.value.clone(),
                Some(entity),
                Phase::EntityIntent,
                score,
            ));
        }
        for relation in &relations {
            let score = if relation.predicate == key {
                SCORE_EXACT_PREDICATE
            } else {
                SCORE_PARTIAL_KEY
            };
            collector.push(SearchResult::from_relation(
                relation,
                relation.object.clone(),
                Some(entity),
                Phase::EntityIntent,
                score,
            ));
        }

        debug!(phase = 1, entity = %entity, key = %key, facts = facts.len(), relations = relations.len(), "Entity intent phase done");
        Ok(facts.len() + relations.len())
    }

    /// Phase 2
    async fn entity_phase(&self, entity: &str, collector: &mut Collector) -> Result<()> {
        let facts = self.repo.facts_for_entity(entity).await?;
        let outgoing = self.repo.relations_from(entity).await?;
        let incoming = self.repo.relations_to(entity).await?;

        for fact in &facts {
            collector.push(SearchResult::from_fact(
                fact,
                fact_line(fact),
                Some(entity),
                Phase::Entity,
                SCORE_ENTITY_FACT,
            ));
        }
        for relation in &outgoing {
            collector.push(SearchResult::from_relation(
                relation,
                format!("{}: {}", relation.predicate, relation.object),
                Some(entity),
                Phase::Entity,
                SCORE_OUTGOING_RELATION,
            ));
        }
        for relation in &incoming {
            collector.push(SearchResult::from_relation(
                relation,
                relation_triple(relation),
                Some(entity),
                Phase::Entity,
                SCORE_INCOMING_RELATION,
            ));
        }

        debug!(
            phase = 2,
            entity = %entity,
            facts = facts.len(),
            outgoing = outgoing.len(),
            incoming = incoming.len(),
            "Entity phase done"
        );
        Ok(())
    }
}
