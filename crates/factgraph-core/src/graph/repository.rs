//! Repository trait for fact store persistence
//!
//! The search cascade, the activation engine and the ingestion tools all talk
//! to the store through this trait, so tests can swap in any backend.

use async_trait::async_trait;
use serde::Serialize;

use crate::activation::TierCounts;
use crate::error::Result;

use super::types::{
    Alias, CoOccurrence, EntityRecord, Fact, FactCategory, NewFact, NewRelation, Relation,
    Upserted,
};

/// Repository trait for fact store persistence
#[async_trait]
pub trait GraphRepository: Send + Sync {
    // ========== Alias Resolution ==========

    /// All aliases, for scanning free text
    async fn list_aliases(&self) -> Result<Vec<Alias>>;

    /// Canonical entities registered for an alias (case-insensitive)
    async fn entities_for_alias(&self, alias: &str) -> Result<Vec<String>>;

    /// Stored spelling of an entity referenced by any fact or relation
    async fn find_entity(&self, name: &str) -> Result<Option<String>>;

    // ========== Cascade Lookups ==========

    /// Facts of `entity` whose key equals or contains `key`
    async fn facts_matching_key(&self, entity: &str, key: &str) -> Result<Vec<Fact>>;

    /// Outgoing relations of `entity` whose predicate equals or contains `predicate`
    async fn relations_matching_predicate(
        &self,
        entity: &str,
        predicate: &str,
    ) -> Result<Vec<Relation>>;

    /// Every fact of an entity
    async fn facts_for_entity(&self, entity: &str) -> Result<Vec<Fact>>;

    /// Relations where the entity is the subject
    async fn relations_from(&self, entity: &str) -> Result<Vec<Relation>>;

    /// Relations where the entity is the object
    async fn relations_to(&self, entity: &str) -> Result<Vec<Relation>>;

    /// Full-text search over facts; `match_expr` must already be a safe FTS5 expression
    async fn search_facts(&self, match_expr: &str, limit: u32) -> Result<Vec<Fact>>;

    /// Full-text search over relation triples
    async fn search_relations(&self, match_expr: &str, limit: u32) -> Result<Vec<Relation>>;

    // ========== Ingestion ==========

    async fn upsert_fact(&self, fact: &NewFact) -> Result<Upserted>;

    async fn upsert_relation(&self, relation: &NewRelation) -> Result<Upserted>;

    /// Returns false if the mapping already existed
    async fn add_alias(&self, alias: &str, entity: &str) -> Result<bool>;

    /// Remove an alias, optionally only its mapping to one entity
    async fn remove_alias(&self, alias: &str, entity: Option<&str>) -> Result<u64>;

    async fn delete_fact(&self, id: i64) -> Result<bool>;

    async fn delete_relation(&self, id: i64) -> Result<bool>;

    /// Ingest a whole entity record in one transaction
    async fn ingest_record(&self, record: &EntityRecord) -> Result<IngestReport>;

    async fn get_fact(&self, id: i64) -> Result<Option<Fact>>;

    /// List facts, optionally filtered by entity and category
    async fn list_facts(
        &self,
        entity: Option<&str>,
        category: Option<FactCategory>,
    ) -> Result<Vec<Fact>>;

    // ========== Activation ==========

    /// Bump activation and access bookkeeping for every fact, and wire every
    /// unordered pair, in a single transaction
    async fn reinforce(&self, fact_ids: &[i64], step: f64) -> Result<()>;

    /// Decay one batch of facts with `id > after_id`; `None` when no facts remain
    async fn decay_batch(
        &self,
        after_id: i64,
        batch_size: u32,
        factor: f64,
        floor: f64,
    ) -> Result<Option<DecayBatch>>;

    /// What a sweep would do, without writing
    async fn decay_preview(&self, factor: f64, floor: f64) -> Result<DecayPreview>;

    async fn record_decay_run(&self, run: &DecayRun) -> Result<()>;

    async fn recent_decay_runs(&self, limit: u32) -> Result<Vec<DecayRun>>;

    /// Claim the store-wide sweep lease for `ttl_secs`; false while another holder's lease is live
    async fn acquire_decay_lease(&self, holder: &str, ttl_secs: i64) -> Result<bool>;

    /// Give the lease back if `holder` still owns it
    async fn release_decay_lease(&self, holder: &str) -> Result<()>;

    async fn co_occurrence(&self, a: i64, b: i64) -> Result<Option<CoOccurrence>>;

    /// Facts most often retrieved together with `fact_id`, strongest first
    async fn strongest_associations(&self, fact_id: i64, limit: u32)
    -> Result<Vec<(Fact, i64)>>;

    // ========== Maintenance ==========

    async fn tier_counts(&self) -> Result<TierCounts>;

    async fn stats(&self) -> Result<GraphStats>;

    async fn check_indexes(&self) -> Result<Vec<IndexCheck>>;

    async fn rebuild_indexes(&self) -> Result<()>;
}

/// Outcome of ingesting an [`EntityRecord`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub facts_inserted: u64,
    pub facts_existing: u64,
    pub aliases_added: u64,
}

/// One committed decay batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayBatch {
    /// Highest fact id covered by the batch
    pub last_id: i64,
    /// Facts whose activation changed
    pub decayed: u64,
    /// Facts that dropped below the floor and were set to zero
    pub zeroed: u64,
}

/// Result of a dry-run sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecayPreview {
    pub would_decay: u64,
    pub would_zero: u64,
    pub tiers_before: TierCounts,
    pub tiers_after: TierCounts,
}

/// Audit row for a completed sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecayRun {
    pub ran_at: chrono::DateTime<chrono::Utc>,
    pub decay_factor: f64,
    pub facts_decayed: u64,
    pub facts_zeroed: u64,
    pub batches: u64,
    pub duration_ms: u64,
}

/// Result of an FTS5 integrity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexCheck {
    pub index: &'static str,
    pub healthy: bool,
    pub detail: Option<String>,
}

/// Statistics about the fact store
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub total_facts: u64,
    pub permanent_facts: u64,
    pub total_relations: u64,
    pub total_aliases: u64,
    pub co_occurrence_pairs: u64,
    pub facts_by_category: Vec<(FactCategory, u64)>,
    pub tiers: TierCounts,
    pub average_activation: f64,
    /// Lowest-activation non-permanent facts
    pub coldest: Vec<Fact>,
}
