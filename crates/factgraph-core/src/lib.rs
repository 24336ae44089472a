//! Factgraph Core Library
//!
//! This crate provides the core functionality for Factgraph, including:
//! - Storage (SQLite with FTS5 shadow indexes, versioned migrations)
//! - Fact graph (facts, relations, aliases, co-occurrences) and idempotent ingestion
//! - Search cascade (entity and intent extraction, alias resolution, four retrieval phases)
//! - Precision gate over cascade results
//! - Activation reinforcement and decay sweeps
//! - Query cache
//! - Host integration helpers

pub mod activation;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod host;
pub mod search;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::SearchEngine;
    pub use crate::error::{Error, Result};
    pub use crate::graph::{EntityRecord, GraphRepository, NewFact, NewRelation, SqliteGraphStore};
    pub use crate::search::SearchResult;
    pub use crate::storage::Database;
}
