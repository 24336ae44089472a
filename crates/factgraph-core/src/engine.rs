//! Caller-facing search engine
//!
//! `SearchEngine` owns the cascade, the precision gate, the activation engine and
//! the query cache for one store. It is cheap to share behind an `Arc` and safe to
//! call from overlapping turns.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, warn};

use crate::activation::{ActivationEngine, DecayReport};
use crate::cache::{InFlight, QueryCache, normalize_key};
use crate::config::{Config, SearchConfig};
use crate::error::{Error, Result};
use crate::graph::{DecayPreview, GraphRepository};
use crate::search::{EntityExtractor, IntentExtractor, ResultFilter, SearchCascade, SearchResult};

/// Counters since the engine was built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub queries: u64,
    pub cache_hits: u64,
    /// Cascade runs that reached the store
    pub store_lookups: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    queries: AtomicU64,
    cache_hits: AtomicU64,
    store_lookups: AtomicU64,
    failures: AtomicU64,
}

pub struct SearchEngine<R: GraphRepository> {
    repo: Arc<R>,
    cascade: SearchCascade<R>,
    activation: ActivationEngine<R>,
    cache: QueryCache<Vec<SearchResult>>,
    in_flight: InFlight,
    search: SearchConfig,
    counters: Counters,
}

impl<R: GraphRepository> SearchEngine<R> {
    pub fn new(repo: Arc<R>, config: &Config) -> Self {
        Self::with_intents(repo, config, IntentExtractor::default())
    }

    /// Build with a custom intent table
    pub fn with_intents(repo: Arc<R>, config: &Config, intents: IntentExtractor) -> Self {
        let entities = EntityExtractor::new(config.search.identity_entity.clone());
        Self {
            cascade: SearchCascade::new(Arc::clone(&repo), entities, intents, config.search.fts_limit),
            activation: ActivationEngine::new(Arc::clone(&repo), config.activation.clone()),
            cache: QueryCache::from_config(&config.cache),
            in_flight: InFlight::new(),
            search: config.search.clone(),
            counters: Counters::default(),
            repo,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    /// Run a query, propagating every failure
    pub async fn try_search(&self, query: &str, top_k: usize, min_score: u8) -> Result<Vec<SearchResult>> {
        self.counters.queries.fetch_add(1, Ordering::Relaxed);

        let length = query.trim().chars().count();
        if length < self.search.min_query_len {
            return Err(Error::QueryTooShort(length, self.search.min_query_len));
        }

        let key = normalize_key(query, top_k, min_score);
        if let Some(results) = self.cached(&key) {
            debug!(query = %query, results = results.len(), "Query cache hit");
            return Ok(results);
        }

        // An identical query may be running; wait for it and reuse its answer
        let _slot = self.in_flight.acquire(&key).await;
        if let Some(results) = self.cached(&key) {
            debug!(query = %query, results = results.len(), "Query answered by an overlapping lookup");
            return Ok(results);
        }

        self.counters.store_lookups.fetch_add(1, Ordering::Relaxed);
        let outcome = self.cascade.run(query, top_k).await?;
        let found = outcome.results.len();

        let filter = ResultFilter::new(self.search.entity_match_threshold, min_score);
        let mut results = filter.apply(outcome.results);
        results.truncate(top_k);

        if !results.is_empty() {
            self.activation.reinforce(&results).await?;
        }

        debug!(
            query = %query,
            entities = ?outcome.entities,
            intent = ?outcome.intent,
            found,
            accepted = results.len(),
            "Query answered from store"
        );

        self.cache.insert(key, results.clone());
        Ok(results)
    }

    fn cached(&self, key: &str) -> Option<Vec<SearchResult>> {
        let results = self.cache.get(key)?;
        self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        Some(results)
    }

    /// Run a query; any failure is logged and reads as "no results"
    pub async fn search(&self, query: &str, top_k: usize, min_score: u8) -> Vec<SearchResult> {
        match self.try_search(query, top_k, min_score).await {
            Ok(results) => results,
            Err(Error::QueryTooShort(length, min)) => {
                debug!(length, min, "Query below minimum length, skipping graph lookup");
                Vec::new()
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(code = err.code(), error = %err, "Graph lookup failed, returning no results");
                Vec::new()
            }
        }
    }

    /// `search` with the configured top-k and minimum score
    pub async fn search_default(&self, query: &str) -> Vec<SearchResult> {
        self.search(query, self.search.top_k, self.search.min_score).await
    }

    pub async fn decay(&self) -> Result<DecayReport> {
        self.activation.decay().await
    }

    pub async fn decay_preview(&self) -> Result<DecayPreview> {
        self.activation.preview().await
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            queries: self.counters.queries.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            store_lookups: self.counters.store_lookups.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn search_config(&self) -> &SearchConfig {
        &self.search
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NewFact, NewRelation, SqliteGraphStore};
    use crate::storage::Database;

    async fn setup_engine(config: &Config) -> SearchEngine<SqliteGraphStore> {
        let db = Database::in_memory().await.expect("Failed to create database");
        let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));

        store.add_alias("keystone", "Keystone").await.unwrap();
        store
            .upsert_relation(&NewRelation::new("Keystone", "runs_on", "port 3055"))
            .await
            .unwrap();
        store
            .upsert_fact(&NewFact::new("Keystone", "language", "Rust"))
            .await
            .unwrap();

        SearchEngine::new(store, config)
    }

    #[tokio::test]
    async fn test_short_query_is_rejected() {
        let engine = setup_engine(&Config::default()).await;
        let err = engine.try_search("  hi  ", 5, 40).await.unwrap_err();
        assert!(matches!(err, Error::QueryTooShort(2, 5)));
        assert!(engine.search("hi", 5, 40).await.is_empty());
        assert_eq!(engine.stats().store_lookups, 0);
    }

    #[tokio::test]
    async fn test_repeat_query_hits_cache() {
        let engine = setup_engine(&Config::default()).await;
        let first = engine.search("What port does Keystone run on?", 5, 40).await;
        let second = engine.search("What port does  Keystone run on?", 5, 40).await;

        assert!(!first.is_empty());
        assert_eq!(first, second);
        let stats = engine.stats();
        assert_eq!(stats.store_lookups, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_lookup() {
        let engine = setup_engine(&Config::default()).await;
        engine.search("Tell me about Keystone", 5, 40).await;
        engine.clear_cache();
        engine.search("Tell me about Keystone", 5, 40).await;
        assert_eq!(engine.stats().store_lookups, 2);
    }

    #[tokio::test]
    async fn test_results_respect_top_k() {
        let engine = setup_engine(&Config::default()).await;
        let results = engine.search("Tell me about Keystone", 1, 40).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_fails_open() {
        let db = Database::in_memory().await.unwrap();
        let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));
        let engine = SearchEngine::new(store, &Config::default());
        db.close().await;

        let err = engine.try_search("Tell me about Keystone", 5, 40).await.unwrap_err();
        assert!(err.is_store_failure());

        assert!(engine.search("Tell me about Keystone please", 5, 40).await.is_empty());
        assert_eq!(engine.stats().failures, 1);
    }
}
