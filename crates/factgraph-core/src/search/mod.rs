//! Query-side of the fact graph
//!
//! # Architecture
//!
//! - `entities`: candidate entity names from free text
//! - `intent`: query vocabulary to a fact key
//! - `alias`: candidates to canonical entities
//! - `fts`: safe FTS5 match expressions
//! - `cascade`: the four retrieval phases
//! - `filter`: the precision gate
//! - `types`: result records

pub mod alias;
pub mod cascade;
pub mod entities;
pub mod filter;
pub mod fts;
pub mod intent;
pub mod types;

pub use alias::{AliasResolver, Resolution};
pub use cascade::{CascadeOutcome, SearchCascade};
pub use entities::EntityExtractor;
pub use filter::ResultFilter;
pub use fts::build_match_query;
pub use intent::IntentExtractor;
pub use types::{Phase, SearchResult, SourceTable};
