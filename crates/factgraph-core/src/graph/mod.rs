//! The persisted fact graph
//!
//! Facts, relations, aliases and co-occurrence links, plus the repository
//! abstraction the rest of the crate reads and writes them through.
//!
//! # Architecture
//!
//! - `types`: Records and ingestion-boundary validation
//! - `repository`: The `GraphRepository` trait and its report types
//! - `store`: SQLite/FTS5 implementation

pub mod repository;
pub mod store;
pub mod types;

pub use repository::{
    DecayBatch, DecayPreview, DecayRun, GraphRepository, GraphStats, IndexCheck, IngestReport,
};
pub use store::SqliteGraphStore;
pub use types::{
    Alias, CoOccurrence, DEFAULT_IMPORTANCE, EntityRecord, Fact, FactCategory, NewFact,
    NewRelation, PERMANENT_IMPORTANCE, Relation, Upserted,
};
