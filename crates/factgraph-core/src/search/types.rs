//! Result records produced by the search cascade

use serde::{Deserialize, Serialize};

use crate::graph::{Fact, Relation};

/// Table a result was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTable {
    Facts,
    Relations,
}

impl SourceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facts => "facts",
            Self::Relations => "relations",
        }
    }
}

impl std::fmt::Display for SourceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Cascade phase, in confidence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Resolved entity plus a known intent key
    EntityIntent = 1,
    /// Everything known about a resolved entity
    Entity = 2,
    /// Full-text search over facts
    FactText = 3,
    /// Full-text search over relation triples
    RelationText = 4,
}

impl Phase {
    pub fn number(&self) -> u8 {
        *self as u8
    }
}

/// One answer from the cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Resolved entity this answer belongs to; `None` for full-text hits
    pub entity: Option<String>,
    /// Entity (or relation subject) of the underlying row
    pub subject: String,
    pub answer: String,
    pub source: SourceTable,
    pub score: u8,
    pub phase: Phase,
    /// Row id within `source`
    pub row_id: i64,
    pub activation: f64,
    pub importance: f64,
}

impl SearchResult {
    pub fn from_fact(fact: &Fact, answer: String, entity: Option<&str>, phase: Phase, score: u8) -> Self {
        Self {
            entity: entity.map(str::to_string),
            subject: fact.entity.clone(),
            answer,
            source: SourceTable::Facts,
            score,
            phase,
            row_id: fact.id,
            activation: fact.activation,
            importance: fact.importance,
        }
    }

    pub fn from_relation(
        relation: &Relation,
        answer: String,
        entity: Option<&str>,
        phase: Phase,
        score: u8,
    ) -> Self {
        Self {
            entity: entity.map(str::to_string),
            subject: relation.subject.clone(),
            answer,
            source: SourceTable::Relations,
            score,
            phase,
            row_id: relation.id,
            activation: 0.0,
            importance: 0.0,
        }
    }

    /// Entity to group this answer under when presenting it
    pub fn group_key(&self) -> &str {
        self.entity.as_deref().unwrap_or(&self.subject)
    }

    pub fn fact_id(&self) -> Option<i64> {
        (self.source == SourceTable::Facts).then_some(self.row_id)
    }
}
