//! Fact, relation and alias records
//!
//! Facts are free-form (entity, key, value) triples, but everything entering
//! the store passes through [`NewFact`], [`NewRelation`] or [`EntityRecord`],
//! which validate keys, values and importance before any SQL runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::activation::RetentionTier;
use crate::error::{Error, Result};

/// Importance at which a fact is permanent
pub const PERMANENT_IMPORTANCE: f64 = 1.0;

/// Default importance for newly ingested facts
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Category of the entity a fact describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Person,
    Project,
    Infrastructure,
    Document,
    Event,
    Decision,
    Convention,
    Preference,
    Credential,
    Date,
    Location,
    Other,
}

impl FactCategory {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Project => "project",
            Self::Infrastructure => "infrastructure",
            Self::Document => "document",
            Self::Event => "event",
            Self::Decision => "decision",
            Self::Convention => "convention",
            Self::Preference => "preference",
            Self::Credential => "credential",
            Self::Date => "date",
            Self::Location => "location",
            Self::Other => "other",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "person" | "people" => Some(Self::Person),
            "project" => Some(Self::Project),
            "infrastructure" | "infra" => Some(Self::Infrastructure),
            "document" | "doc" => Some(Self::Document),
            "event" => Some(Self::Event),
            "decision" => Some(Self::Decision),
            "convention" => Some(Self::Convention),
            "preference" | "pref" => Some(Self::Preference),
            "credential" => Some(Self::Credential),
            "date" => Some(Self::Date),
            "location" | "place" => Some(Self::Location),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Get all categories
    pub fn all() -> &'static [FactCategory] {
        &[
            Self::Person,
            Self::Project,
            Self::Infrastructure,
            Self::Document,
            Self::Event,
            Self::Decision,
            Self::Convention,
            Self::Preference,
            Self::Credential,
            Self::Date,
            Self::Location,
            Self::Other,
        ]
    }
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub entity: String,
    pub key: String,
    pub value: String,
    pub category: FactCategory,
    /// Retention weight in 0..=1
    pub importance: f64,
    /// Reinforcement score, mutated only by the activation engine
    pub activation: f64,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_count: i64,
}

impl Fact {
    /// Permanent facts are exempt from tier-based pruning
    pub fn is_permanent(&self) -> bool {
        self.importance >= PERMANENT_IMPORTANCE
    }

    pub fn tier(&self) -> RetentionTier {
        RetentionTier::classify(self.activation)
    }
}

/// A stored relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub weight: f64,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// A surface form pointing at a canonical entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub alias: String,
    pub entity: String,
}

/// Learned association between two facts, stored with `fact_a < fact_b`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoOccurrence {
    pub fact_a: i64,
    pub fact_b: i64,
    pub count: i64,
    pub last_wired: DateTime<Utc>,
}

/// Outcome of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "id", rename_all = "snake_case")]
pub enum Upserted {
    Inserted(i64),
    Existing(i64),
}

impl Upserted {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Existing(id) => *id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// A fact waiting to be ingested
#[derive(Debug, Clone, PartialEq)]
pub struct NewFact {
    pub entity: String,
    pub key: String,
    pub value: String,
    pub category: FactCategory,
    pub importance: f64,
    pub source: String,
}

impl NewFact {
    pub fn new(
        entity: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into().trim().to_string(),
            key: key.into().trim().to_string(),
            value: value.into().trim().to_string(),
            category: FactCategory::Other,
            importance: DEFAULT_IMPORTANCE,
            source: String::new(),
        }
    }

    pub fn with_category(mut self, category: FactCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Mark the fact permanent
    pub fn permanent(self) -> Self {
        self.with_importance(PERMANENT_IMPORTANCE)
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("entity", &self.entity)?;
        validate_key(&self.key)?;
        if self.value.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Fact {}.{} has an empty value",
                self.entity, self.key
            )));
        }
        if !(0.0..=1.0).contains(&self.importance) {
            return Err(Error::InvalidInput(format!(
                "Importance must be between 0.0 and 1.0, got {}",
                self.importance
            )));
        }
        Ok(())
    }
}

/// A relation waiting to be ingested
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub weight: f64,
    pub source: String,
}

impl NewRelation {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into().trim().to_string(),
            predicate: predicate.into().trim().to_string(),
            object: object.into().trim().to_string(),
            weight: 1.0,
            source: String::new(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("subject", &self.subject)?;
        validate_key(&self.predicate)?;
        validate_name("object", &self.object)?;
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(Error::InvalidInput(format!(
                "Relation weight must be a non-negative number, got {}",
                self.weight
            )));
        }
        Ok(())
    }
}

/// Everything known about one entity, as handed over by seeding tools
///
/// Flattened into one fact per (key, value) pair at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: String,
    pub category: FactCategory,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Vec<String>>,
}

fn default_importance() -> f64 {
    DEFAULT_IMPORTANCE
}

impl EntityRecord {
    pub fn new(entity: impl Into<String>, category: FactCategory) -> Self {
        Self {
            entity: entity.into(),
            category,
            importance: DEFAULT_IMPORTANCE,
            source: String::new(),
            aliases: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Validate and flatten into individual facts
    pub fn to_facts(&self) -> Result<Vec<NewFact>> {
        validate_name("entity", self.entity.trim())?;
        for alias in &self.aliases {
            validate_name("alias", alias.trim())?;
        }

        let mut facts = Vec::new();
        for (key, values) in &self.attributes {
            for value in values {
                let fact = NewFact::new(self.entity.as_str(), key.as_str(), value.as_str())
                    .with_category(self.category)
                    .with_importance(self.importance)
                    .with_source(self.source.clone());
                fact.validate()?;
                facts.push(fact);
            }
        }
        Ok(facts)
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(())
}

/// Keys and predicates are snake_case identifiers
fn validate_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(Error::InvalidInput(format!(
            "Key '{}' must be a snake_case identifier (e.g. full_name, runs_on)",
            key
        )));
    }
    Ok(())
}
