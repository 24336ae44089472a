//! Surface forms to canonical entities

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::graph::GraphRepository;

/// Outcome of resolving one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "entities", rename_all = "snake_case")]
pub enum Resolution {
    Unresolved,
    Unique(String),
    /// The alias was seeded for several entities; callers fan out over all of them
    Ambiguous(Vec<String>),
}

impl Resolution {
    pub fn entities(&self) -> &[String] {
        match self {
            Self::Unresolved => &[],
            Self::Unique(entity) => std::slice::from_ref(entity),
            Self::Ambiguous(entities) => entities,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }
}

/// Alias lookup first, then the candidate itself as a canonical entity
pub struct AliasResolver<R: GraphRepository> {
    repo: Arc<R>,
}

impl<R: GraphRepository> Clone for AliasResolver<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
        }
    }
}

impl<R: GraphRepository> AliasResolver<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    pub async fn resolve(&self, candidate: &str) -> Result<Resolution> {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return Ok(Resolution::Unresolved);
        }

        let mut entities = self.repo.entities_for_alias(candidate).await?;
        let resolution = match entities.len() {
            0 => match self.repo.find_entity(candidate).await? {
                Some(entity) => Resolution::Unique(entity),
                None => Resolution::Unresolved,
            },
            1 => Resolution::Unique(entities.remove(0)),
            _ => Resolution::Ambiguous(entities),
        };

        debug!(candidate = %candidate, resolution = ?resolution, "Candidate resolved");
        Ok(resolution)
    }

    /// Resolve a capitalised run, falling back to its parts when the whole run is unknown
    ///
    /// "Describe Keystone" tries "Keystone" next, then each single word in order.
    /// The first part that resolves wins.
    pub async fn resolve_run(&self, run: &str) -> Result<Resolution> {
        let resolution = self.resolve(run).await?;
        let words: Vec<&str> = run.split_whitespace().collect();
        if resolution.is_resolved() || words.len() < 2 {
            return Ok(resolution);
        }

        let suffixes = (1..words.len()).map(|start| words[start..].join(" "));
        let singles = words[..words.len() - 1].iter().map(|word| word.to_string());
        for part in suffixes.chain(singles) {
            let resolution = self.resolve(&part).await?;
            if resolution.is_resolved() {
                debug!(run = %run, part = %part, "Run resolved through a sub-run");
                return Ok(resolution);
            }
        }
        Ok(Resolution::Unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NewFact, SqliteGraphStore};
    use crate::storage::Database;

    async fn setup() -> (AliasResolver<SqliteGraphStore>, Arc<SqliteGraphStore>) {
        let db = Database::in_memory().await.expect("Failed to create database");
        let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));
        (AliasResolver::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn test_alias_round_trip_any_case() {
        let (resolver, store) = setup().await;
        store.add_alias("Mama", "Heidi").await.unwrap();

        for surface in ["Mama", "mama", "MAMA", "mAmA"] {
            assert_eq!(
                resolver.resolve(surface).await.unwrap(),
                Resolution::Unique("Heidi".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_unaliased_entity_resolves_to_itself() {
        let (resolver, store) = setup().await;
        store
            .upsert_fact(&NewFact::new("Keystone", "port", "3055"))
            .await
            .unwrap();

        assert_eq!(
            resolver.resolve("keystone").await.unwrap(),
            Resolution::Unique("Keystone".to_string())
        );
        assert_eq!(
            resolver.resolve("Unknown").await.unwrap(),
            Resolution::Unresolved
        );
    }

    #[tokio::test]
    async fn test_ambiguous_alias_keeps_every_entity() {
        let (resolver, store) = setup().await;
        store.add_alias("Sam", "Samuel").await.unwrap();
        store.add_alias("Sam", "Samantha").await.unwrap();

        let resolution = resolver.resolve("sam").await.unwrap();
        assert_eq!(resolution.entities(), ["Samantha", "Samuel"]);
        assert!(resolution.is_resolved());
    }

    #[tokio::test]
    async fn test_run_falls_back_to_trailing_words() {
        let (resolver, store) = setup().await;
        store
            .upsert_fact(&NewFact::new("Keystone", "stack", "axum"))
            .await
            .unwrap();
        store.add_alias("Heidi Smith", "Heidi").await.unwrap();

        assert_eq!(
            resolver.resolve_run("Describe Keystone").await.unwrap(),
            Resolution::Unique("Keystone".to_string())
        );
        assert_eq!(
            resolver.resolve_run("Remember Heidi Smith").await.unwrap(),
            Resolution::Unique("Heidi".to_string())
        );
        assert_eq!(
            resolver.resolve_run("Keystone Docs").await.unwrap(),
            Resolution::Unique("Keystone".to_string())
        );
        assert_eq!(
            resolver.resolve_run("Explain Nothing").await.unwrap(),
            Resolution::Unresolved
        );
    }

    #[test]
    fn test_resolution_entities() {
        assert!(Resolution::Unresolved.entities().is_empty());
        assert_eq!(Resolution::Unique("A".into()).entities(), ["A"]);
    }
}
