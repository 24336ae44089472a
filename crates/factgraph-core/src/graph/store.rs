//! SQLite implementation of the GraphRepository
//!
//! Entity matching is case-insensitive (`COLLATE NOCASE`); FTS5 shadow tables are kept
//! in sync by triggers, so every write here is visible to full-text search on return.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::{debug, info};

use crate::activation::{HOT_THRESHOLD, TierCounts, WARM_THRESHOLD};
use crate::error::{Error, Result};

use super::repository::{
    DecayBatch, DecayPreview, DecayRun, GraphRepository, GraphStats, IndexCheck, IngestReport,
};
use super::types::{
    Alias, CoOccurrence, EntityRecord, Fact, FactCategory, NewFact, NewRelation, Relation,
    Upserted,
};

/// The full-text shadow tables, in check order
const FTS_TABLES: [&str; 2] = ["facts_fts", "relations_fts"];

/// Number of coldest facts reported by `stats`
const COLDEST_LIMIT: i64 = 5;

/// Tier counts over the activation values a sweep with (factor, floor) would leave behind.
/// A factor of 1 and a floor of 0 gives the current tiers.
const TIER_QUERY: &str = r#"
    SELECT
        SUM(CASE WHEN v > ? THEN 1 ELSE 0 END),
        SUM(CASE WHEN v >= ? AND v <= ? THEN 1 ELSE 0 END),
        SUM(CASE WHEN v < ? THEN 1 ELSE 0 END)
    FROM (
        SELECT CASE
            WHEN activation > 0 AND activation * ? < ? THEN 0.0
            WHEN activation > 0 THEN activation * ?
            ELSE activation
        END AS v
        FROM facts
    )
"#;

/// SQLite implementation of the fact store
#[derive(Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Create a new store over an already-migrated pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn tiers_after(&self, factor: f64, floor: f64) -> Result<TierCounts> {
        let (hot, warm, cool): (Option<i64>, Option<i64>, Option<i64>) =
            sqlx::query_as(TIER_QUERY)
                .bind(HOT_THRESHOLD)
                .bind(WARM_THRESHOLD)
                .bind(HOT_THRESHOLD)
                .bind(WARM_THRESHOLD)
                .bind(factor)
                .bind(floor)
                .bind(factor)
                .fetch_one(&self.pool)
                .await?;

        Ok(TierCounts {
            hot: hot.unwrap_or(0) as u64,
            warm: warm.unwrap_or(0) as u64,
            cool: cool.unwrap_or(0) as u64,
        })
    }
}

async fn insert_fact(conn: &mut SqliteConnection, fact: &NewFact) -> Result<Upserted> {
    fact.validate()?;

    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO facts (entity, key, value, category, importance, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(entity, key, value) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&fact.entity)
    .bind(&fact.key)
    .bind(&fact.value)
    .bind(fact.category.as_str())
    .bind(fact.importance)
    .bind(&fact.source)
    .bind(Utc::now().to_rfc3339())
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((id,)) = inserted {
        return Ok(Upserted::Inserted(id));
    }

    let (id,): (i64,) =
        sqlx::query_as("SELECT id FROM facts WHERE entity = ? AND key = ? AND value = ?")
            .bind(&fact.entity)
            .bind(&fact.key)
            .bind(&fact.value)
            .fetch_one(&mut *conn)
            .await?;
    Ok(Upserted::Existing(id))
}

async fn insert_alias(conn: &mut SqliteConnection, alias: &str, entity: &str) -> Result<bool> {
    let alias = alias.trim();
    let entity = entity.trim();
    if alias.is_empty() || entity.is_empty() {
        return Err(Error::InvalidInput(
            "Alias and entity must not be empty".to_string(),
        ));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO aliases (alias, entity, created_at) VALUES (?, ?, ?)
        ON CONFLICT(alias, entity) DO NOTHING
        "#,
    )
    .bind(alias)
    .bind(entity)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl GraphRepository for SqliteGraphStore {
    // ========== Alias Resolution ==========

    async fn list_aliases(&self) -> Result<Vec<Alias>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT alias, entity FROM aliases ORDER BY alias, entity")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(alias, entity)| Alias { alias, entity })
            .collect())
    }

    async fn entities_for_alias(&self, alias: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT entity FROM aliases WHERE alias = ? ORDER BY entity")
                .bind(alias.trim())
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(e,)| e).collect())
    }

    async fn find_entity(&self, name: &str) -> Result<Option<String>> {
        let name = name.trim();
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT entity FROM facts WHERE entity = ? COLLATE NOCASE
            UNION ALL
            SELECT subject FROM relations WHERE subject = ? COLLATE NOCASE
            UNION ALL
            SELECT object FROM relations WHERE object = ? COLLATE NOCASE
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(name)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(e,)| e))
    }

    // ========== Cascade Lookups ==========

    async fn facts_matching_key(&self, entity: &str, key: &str) -> Result<Vec<Fact>> {
        let rows: Vec<FactRow> = sqlx::query_as(
            r#"
            SELECT * FROM facts
            WHERE entity = ? COLLATE NOCASE AND (key = ? OR instr(key, ?) > 0)
            ORDER BY activation DESC, importance DESC, id
            "#,
        )
        .bind(entity)
        .bind(key)
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_fact()).collect()
    }

    async fn relations_matching_predicate(
        &self,
        entity: &str,
        predicate: &str,
    ) -> Result<Vec<Relation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(
            r#"
            SELECT * FROM relations
            WHERE subject = ? COLLATE NOCASE AND (predicate = ? OR instr(predicate, ?) > 0)
            ORDER BY weight DESC, id
            "#,
        )
        .bind(entity)
        .bind(predicate)
        .bind(predicate)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_relation()).collect())
    }

    async fn facts_for_entity(&self, entity: &str) -> Result<Vec<Fact>> {
        let rows: Vec<FactRow> = sqlx::query_as(
            r#"
            SELECT * FROM facts
            WHERE entity = ? COLLATE NOCASE
            ORDER BY activation DESC, importance DESC, id
            "#,
        )
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_fact()).collect()
    }

    async fn relations_from(&self, entity: &str) -> Result<Vec<Relation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(
            "SELECT * FROM relations WHERE subject = ? COLLATE NOCASE ORDER BY weight DESC, id",
        )
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_relation()).collect())
    }

    async fn relations_to(&self, entity: &str) -> Result<Vec<Relation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(
            "SELECT * FROM relations WHERE object = ? COLLATE NOCASE ORDER BY weight DESC, id",
        )
        .bind(entity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_relation()).collect())
    }

    async fn search_facts(&self, match_expr: &str, limit: u32) -> Result<Vec<Fact>> {
        if match_expr.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<FactRow> = sqlx::query_as(
            r#"
            SELECT f.* FROM facts f
            JOIN facts_fts fts ON f.id = fts.rowid
            WHERE facts_fts MATCH ?
            ORDER BY rank, f.activation DESC
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        debug!(match_expr = %match_expr, hits = rows.len(), "Fact full-text search");
        rows.into_iter().map(|r| r.into_fact()).collect()
    }

    async fn search_relations(&self, match_expr: &str, limit: u32) -> Result<Vec<Relation>> {
        if match_expr.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<RelationRow> = sqlx::query_as(
            r#"
            SELECT r.* FROM relations r
            JOIN relations_fts fts ON r.id = fts.rowid
            WHERE relations_fts MATCH ?
            ORDER BY rank, r.weight DESC
            LIMIT ?
            "#,
        )
        .bind(match_expr)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        debug!(match_expr = %match_expr, hits = rows.len(), "Relation full-text search");
        Ok(rows.into_iter().map(|r| r.into_relation()).collect())
    }

    // ========== Ingestion ==========

    async fn upsert_fact(&self, fact: &NewFact) -> Result<Upserted> {
        let mut conn = self.pool.acquire().await?;
        let outcome = insert_fact(&mut conn, fact).await?;

        if outcome.is_inserted() {
            info!(fact_id = outcome.id(), entity = %fact.entity, key = %fact.key, "Fact inserted");
        }
        Ok(outcome)
    }

    async fn upsert_relation(&self, relation: &NewRelation) -> Result<Upserted> {
        relation.validate()?;

        let inserted: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO relations (subject, predicate, object, weight, source, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(subject, predicate, object) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&relation.subject)
        .bind(&relation.predicate)
        .bind(&relation.object)
        .bind(relation.weight)
        .bind(&relation.source)
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id,)) = inserted {
            info!(
                relation_id = id,
                subject = %relation.subject,
                predicate = %relation.predicate,
                "Relation inserted"
            );
            return Ok(Upserted::Inserted(id));
        }

        let (id,): (i64,) = sqlx::query_as(
            "SELECT id FROM relations WHERE subject = ? AND predicate = ? AND object = ?",
        )
        .bind(&relation.subject)
        .bind(&relation.predicate)
        .bind(&relation.object)
        .fetch_one(&self.pool)
        .await?;
        Ok(Upserted::Existing(id))
    }

    async fn add_alias(&self, alias: &str, entity: &str) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let added = insert_alias(&mut conn, alias, entity).await?;
        if added {
            info!(alias = %alias, entity = %entity, "Alias added");
        }
        Ok(added)
    }

    async fn remove_alias(&self, alias: &str, entity: Option<&str>) -> Result<u64> {
        let result = match entity {
            Some(entity) => {
                sqlx::query("DELETE FROM aliases WHERE alias = ? AND entity = ?")
                    .bind(alias.trim())
                    .bind(entity.trim())
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM aliases WHERE alias = ?")
                    .bind(alias.trim())
                    .execute(&self.pool)
                    .await?
            }
        };

        let removed = result.rows_affected();
        if removed > 0 {
            info!(alias = %alias, removed, "Alias removed");
        }
        Ok(removed)
    }

    async fn delete_fact(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM facts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(fact_id = id, "Fact deleted");
        }
        Ok(deleted)
    }

    async fn delete_relation(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM relations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(relation_id = id, "Relation deleted");
        }
        Ok(deleted)
    }

    async fn ingest_record(&self, record: &EntityRecord) -> Result<IngestReport> {
        let facts = record.to_facts()?;
        let mut report = IngestReport::default();

        let mut tx = self.pool.begin().await?;
        for fact in &facts {
            match insert_fact(&mut tx, fact).await? {
                Upserted::Inserted(_) => report.facts_inserted += 1,
                Upserted::Existing(_) => report.facts_existing += 1,
            }
        }
        for alias in &record.aliases {
            if insert_alias(&mut tx, alias, &record.entity).await? {
                report.aliases_added += 1;
            }
        }
        tx.commit().await?;

        info!(
            entity = %record.entity,
            inserted = report.facts_inserted,
            existing = report.facts_existing,
            aliases = report.aliases_added,
            "Entity record ingested"
        );
        Ok(report)
    }

    async fn get_fact(&self, id: i64) -> Result<Option<Fact>> {
        let row: Option<FactRow> = sqlx::query_as("SELECT * FROM facts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_fact()).transpose()
    }

    async fn list_facts(
        &self,
        entity: Option<&str>,
        category: Option<FactCategory>,
    ) -> Result<Vec<Fact>> {
        let category = category.map(|c| c.as_str());
        let rows: Vec<FactRow> = sqlx::query_as(
            r#"
            SELECT * FROM facts
            WHERE (? IS NULL OR entity = ? COLLATE NOCASE)
              AND (? IS NULL OR category = ?)
            ORDER BY entity COLLATE NOCASE, key, id
            "#,
        )
        .bind(entity)
        .bind(entity)
        .bind(category)
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_fact()).collect()
    }

    // ========== Activation ==========

    async fn reinforce(&self, fact_ids: &[i64], step: f64) -> Result<()> {
        let mut ids = fact_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        // Writes only, so the transaction takes the write lock up front
        for id in &ids {
            sqlx::query(
                r#"
                UPDATE facts
                SET activation = activation + ?,
                    access_count = access_count + 1,
                    last_accessed = ?
                WHERE id = ?
                "#,
            )
            .bind(step)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                sqlx::query(
                    r#"
                    INSERT INTO co_occurrences (fact_a, fact_b, count, last_wired)
                    VALUES (?, ?, 1, ?)
                    ON CONFLICT(fact_a, fact_b) DO UPDATE SET
                        count = count + 1,
                        last_wired = excluded.last_wired
                    "#,
                )
                .bind(a)
                .bind(b)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        debug!(facts = ids.len(), step, "Facts reinforced");
        Ok(())
    }

    async fn decay_batch(
        &self,
        after_id: i64,
        batch_size: u32,
        factor: f64,
        floor: f64,
    ) -> Result<Option<DecayBatch>> {
        let (last_id, count): (Option<i64>, i64) = sqlx::query_as(
            "SELECT MAX(id), COUNT(*) FROM (SELECT id FROM facts WHERE id > ? ORDER BY id LIMIT ?)",
        )
        .bind(after_id)
        .bind(i64::from(batch_size))
        .fetch_one(&self.pool)
        .await?;

        let Some(last_id) = last_id.filter(|_| count > 0) else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        let decayed: Vec<(f64,)> = sqlx::query_as(
            r#"
            UPDATE facts
            SET activation = CASE WHEN activation * ? < ? THEN 0.0 ELSE activation * ? END
            WHERE id > ? AND id <= ? AND activation > 0
            RETURNING activation
            "#,
        )
        .bind(factor)
        .bind(floor)
        .bind(factor)
        .bind(after_id)
        .bind(last_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let zeroed = decayed.iter().filter(|(a,)| *a == 0.0).count() as u64;
        Ok(Some(DecayBatch {
            last_id,
            decayed: decayed.len() as u64,
            zeroed,
        }))
    }

    async fn decay_preview(&self, factor: f64, floor: f64) -> Result<DecayPreview> {
        let (would_decay, would_zero): (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(CASE WHEN activation * ? < ? THEN 1 ELSE 0 END)
            FROM facts WHERE activation > 0
            "#,
        )
        .bind(factor)
        .bind(floor)
        .fetch_one(&self.pool)
        .await?;

        Ok(DecayPreview {
            would_decay: would_decay as u64,
            would_zero: would_zero.unwrap_or(0) as u64,
            tiers_before: self.tiers_after(1.0, 0.0).await?,
            tiers_after: self.tiers_after(factor, floor).await?,
        })
    }

    async fn record_decay_run(&self, run: &DecayRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO decay_runs (ran_at, decay_factor, facts_decayed, facts_zeroed, batches, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.ran_at.to_rfc3339())
        .bind(run.decay_factor)
        .bind(run.facts_decayed as i64)
        .bind(run.facts_zeroed as i64)
        .bind(run.batches as i64)
        .bind(run.duration_ms as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_decay_runs(&self, limit: u32) -> Result<Vec<DecayRun>> {
        let rows: Vec<DecayRunRow> = sqlx::query_as(
            r#"
            SELECT ran_at, decay_factor, facts_decayed, facts_zeroed, batches, duration_ms
            FROM decay_runs ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_run()).collect())
    }

    async fn acquire_decay_lease(&self, holder: &str, ttl_secs: i64) -> Result<bool> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO decay_lease (id, holder, expires_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
            WHERE decay_lease.expires_at <= ? OR decay_lease.holder = excluded.holder
            "#,
        )
        .bind(holder)
        .bind(now + ttl_secs)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() == 1;
        debug!(holder = %holder, acquired, "Decay lease requested");
        Ok(acquired)
    }

    async fn release_decay_lease(&self, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM decay_lease WHERE id = 1 AND holder = ?")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn co_occurrence(&self, a: i64, b: i64) -> Result<Option<CoOccurrence>> {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        let row: Option<(i64, i64, i64, String)> = sqlx::query_as(
            "SELECT fact_a, fact_b, count, last_wired FROM co_occurrences WHERE fact_a = ? AND fact_b = ?",
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(fact_a, fact_b, count, last_wired)| CoOccurrence {
            fact_a,
            fact_b,
            count,
            last_wired: parse_timestamp(&last_wired),
        }))
    }

    async fn strongest_associations(
        &self,
        fact_id: i64,
        limit: u32,
    ) -> Result<Vec<(Fact, i64)>> {
        let rows: Vec<AssociationRow> = sqlx::query_as(
            r#"
            SELECT f.*, c.count AS co_count
            FROM co_occurrences c
            JOIN facts f ON f.id = CASE WHEN c.fact_a = ? THEN c.fact_b ELSE c.fact_a END
            WHERE c.fact_a = ? OR c.fact_b = ?
            ORDER BY c.count DESC, c.last_wired DESC
            LIMIT ?
            "#,
        )
        .bind(fact_id)
        .bind(fact_id)
        .bind(fact_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| Ok((r.fact.into_fact()?, r.co_count)))
            .collect()
    }

    // ========== Maintenance ==========

    async fn tier_counts(&self) -> Result<TierCounts> {
        self.tiers_after(1.0, 0.0).await
    }

    async fn stats(&self) -> Result<GraphStats> {
        let (total_facts, permanent_facts, average_activation): (i64, Option<i64>, Option<f64>) =
            sqlx::query_as(
                "SELECT COUNT(*), SUM(CASE WHEN importance >= 1.0 THEN 1 ELSE 0 END), AVG(activation) FROM facts",
            )
            .fetch_one(&self.pool)
            .await?;

        let (total_relations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM relations")
            .fetch_one(&self.pool)
            .await?;

        let (total_aliases,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM aliases")
            .fetch_one(&self.pool)
            .await?;

        let (co_occurrence_pairs,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM co_occurrences")
            .fetch_one(&self.pool)
            .await?;

        let facts_by_category: Vec<(String, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*) FROM facts GROUP BY category ORDER BY COUNT(*) DESC, category",
        )
        .fetch_all(&self.pool)
        .await?;

        let coldest: Vec<FactRow> = sqlx::query_as(
            r#"
            SELECT * FROM facts WHERE importance < 1.0
            ORDER BY activation ASC, last_accessed ASC, id
            LIMIT ?
            "#,
        )
        .bind(COLDEST_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(GraphStats {
            total_facts: total_facts as u64,
            permanent_facts: permanent_facts.unwrap_or(0) as u64,
            total_relations: total_relations as u64,
            total_aliases: total_aliases as u64,
            co_occurrence_pairs: co_occurrence_pairs as u64,
            facts_by_category: facts_by_category
                .into_iter()
                .filter_map(|(c, n)| FactCategory::parse(&c).map(|cat| (cat, n as u64)))
                .collect(),
            tiers: self.tier_counts().await?,
            average_activation: average_activation.unwrap_or(0.0),
            coldest: coldest
                .into_iter()
                .map(|r| r.into_fact())
                .collect::<Result<_>>()?,
        })
    }

    async fn check_indexes(&self) -> Result<Vec<IndexCheck>> {
        let mut checks = Vec::with_capacity(FTS_TABLES.len());
        for index in FTS_TABLES {
            let sql = format!("INSERT INTO {0}({0}) VALUES('integrity-check')", index);
            let check = match sqlx::query(&sql).execute(&self.pool).await {
                Ok(_) => IndexCheck {
                    index,
                    healthy: true,
                    detail: None,
                },
                Err(e) => match Error::from(e) {
                    err @ Error::StoreUnavailable(_) => return Err(err),
                    err => IndexCheck {
                        index,
                        healthy: false,
                        detail: Some(err.to_string()),
                    },
                },
            };
            checks.push(check);
        }
        Ok(checks)
    }

    async fn rebuild_indexes(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for index in FTS_TABLES {
            let sql = format!("INSERT INTO {0}({0}) VALUES('rebuild')", index);
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Full-text indexes rebuilt");
        Ok(())
    }
}

/// Parse a stored timestamp, accepting RFC 3339 and SQLite's `CURRENT_TIMESTAMP` format
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
        .unwrap_or_else(|_| Utc::now())
}

// ========== Database Row Types ==========

#[derive(Debug, FromRow)]
struct FactRow {
    id: i64,
    entity: String,
    key: String,
    value: String,
    category: String,
    importance: f64,
    activation: f64,
    source: String,
    created_at: String,
    last_accessed: Option<String>,
    access_count: i64,
}

impl FactRow {
    fn into_fact(self) -> Result<Fact> {
        let category = FactCategory::parse(&self.category)
            .ok_or_else(|| Error::Other(format!("Invalid fact category: {}", self.category)))?;

        Ok(Fact {
            id: self.id,
            entity: self.entity,
            key: self.key,
            value: self.value,
            category,
            importance: self.importance,
            activation: self.activation,
            source: self.source,
            created_at: parse_timestamp(&self.created_at),
            last_accessed: self.last_accessed.as_deref().map(parse_timestamp),
            access_count: self.access_count,
        })
    }
}

#[derive(Debug, FromRow)]
struct RelationRow {
    id: i64,
    subject: String,
    predicate: String,
    object: String,
    weight: f64,
    source: String,
    created_at: String,
}

impl RelationRow {
    fn into_relation(self) -> Relation {
        Relation {
            id: self.id,
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            weight: self.weight,
            source: self.source,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct AssociationRow {
    #[sqlx(flatten)]
    fact: FactRow,
    co_count: i64,
}

#[derive(Debug, FromRow)]
struct DecayRunRow {
    ran_at: String,
    decay_factor: f64,
    facts_decayed: i64,
    facts_zeroed: i64,
    batches: i64,
    duration_ms: i64,
}

impl DecayRunRow {
    fn into_run(self) -> DecayRun {
        DecayRun {
            ran_at: parse_timestamp(&self.ran_at),
            decay_factor: self.decay_factor,
            facts_decayed: self.facts_decayed as u64,
            facts_zeroed: self.facts_zeroed as u64,
            batches: self.batches as u64,
            duration_ms: self.duration_ms as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::fts::build_match_query;
    use crate::storage::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqliteGraphStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        SqliteGraphStore::new(pool)
    }

    async fn activation_of(store: &SqliteGraphStore, id: i64) -> f64 {
        store.get_fact(id).await.unwrap().unwrap().activation
    }

    #[tokio::test]
    async fn test_upsert_fact_is_idempotent() {
        let store = setup_test_db().await;
        let fact = NewFact::new("Heidi", "phone", "555-0100").with_category(FactCategory::Person);

        let first = store.upsert_fact(&fact).await.unwrap();
        let second = store.upsert_fact(&fact).await.unwrap();

        assert!(first.is_inserted());
        assert_eq!(second, Upserted::Existing(first.id()));
        assert_eq!(store.list_facts(Some("Heidi"), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_multiple_values_per_key() {
        let store = setup_test_db().await;
        store
            .upsert_fact(&NewFact::new("Heidi", "phone", "555-0100"))
            .await
            .unwrap();
        store
            .upsert_fact(&NewFact::new("Heidi", "phone", "555-0101"))
            .await
            .unwrap();

        let phones = store.facts_matching_key("heidi", "phone").await.unwrap();
        assert_eq!(phones.len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_relation_is_idempotent() {
        let store = setup_test_db().await;
        let relation = NewRelation::new("Keystone", "runs_on", "port 3055");

        let first = store.upsert_relation(&relation).await.unwrap();
        let second = store.upsert_relation(&relation).await.unwrap();

        assert!(first.is_inserted());
        assert!(!second.is_inserted());
        assert_eq!(store.relations_from("Keystone").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_fact_never_reaches_store() {
        let store = setup_test_db().await;
        let result = store
            .upsert_fact(&NewFact::new("Heidi", "Phone Number", "1"))
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(store.list_facts(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alias_lookup_is_case_insensitive() {
        let store = setup_test_db().await;
        assert!(store.add_alias("Mama", "Heidi").await.unwrap());
        assert!(!store.add_alias("mama", "Heidi").await.unwrap());

        assert_eq!(store.entities_for_alias("MAMA").await.unwrap(), vec!["Heidi"]);
        assert_eq!(store.list_aliases().await.unwrap().len(), 1);

        assert_eq!(store.remove_alias("mama", None).await.unwrap(), 1);
        assert!(store.entities_for_alias("Mama").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_alias_returns_all_entities() {
        let store = setup_test_db().await;
        store.add_alias("Sam", "Samuel Jones").await.unwrap();
        store.add_alias("Sam", "Samantha Lee").await.unwrap();

        let entities = store.entities_for_alias("sam").await.unwrap();
        assert_eq!(entities, vec!["Samantha Lee", "Samuel Jones"]);

        assert_eq!(
            store.remove_alias("Sam", Some("Samuel Jones")).await.unwrap(),
            1
        );
        assert_eq!(store.entities_for_alias("sam").await.unwrap(), vec!["Samantha Lee"]);
    }

    #[tokio::test]
    async fn test_find_entity_uses_facts_and_relations() {
        let store = setup_test_db().await;
        store
            .upsert_relation(&NewRelation::new("Keystone", "runs_on", "port 3055"))
            .await
            .unwrap();

        assert_eq!(
            store.find_entity("keystone").await.unwrap().as_deref(),
            Some("Keystone")
        );
        assert!(store.find_entity("Nowhere").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_text_search_follows_writes() {
        let store = setup_test_db().await;
        let id = store
            .upsert_fact(&NewFact::new("Keystone", "stack", "rust axum postgres"))
            .await
            .unwrap()
            .id();

        let query = build_match_query("which postgres setup");
        let hits = store.search_facts(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);

        store.delete_fact(id).await.unwrap();
        assert!(store.search_facts(&query, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_activation_updates_do_not_disturb_index() {
        let store = setup_test_db().await;
        let id = store
            .upsert_fact(&NewFact::new("Keystone", "stack", "rust"))
            .await
            .unwrap()
            .id();

        store.reinforce(&[id], 0.5).await.unwrap();

        let checks = store.check_indexes().await.unwrap();
        assert!(checks.iter().all(|c| c.healthy), "{:?}", checks);
        assert_eq!(store.search_facts("\"rust\"", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_index_is_reported_stale() {
        let store = setup_test_db().await;
        sqlx::query("DROP TABLE relations_fts")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.search_relations("\"port\"", 10).await.unwrap_err();
        assert!(matches!(err, Error::IndexStale(_)), "{:?}", err);
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_rebuild_restores_wiped_index() {
        let store = setup_test_db().await;
        store
            .upsert_relation(&NewRelation::new("Keystone", "runs_on", "port 3055"))
            .await
            .unwrap();
        sqlx::query("INSERT INTO relations_fts(relations_fts) VALUES('delete-all')")
            .execute(store.pool())
            .await
            .unwrap();
        assert!(store.search_relations("\"port\"", 10).await.unwrap().is_empty());

        store.rebuild_indexes().await.unwrap();
        assert_eq!(store.search_relations("\"port\"", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reinforce_wires_unordered_pairs() {
        let store = setup_test_db().await;
        let a = store
            .upsert_fact(&NewFact::new("Heidi", "phone", "555-0100"))
            .await
            .unwrap()
            .id();
        let b = store
            .upsert_fact(&NewFact::new("Heidi", "email", "heidi@example.com"))
            .await
            .unwrap()
            .id();

        store.reinforce(&[b, a, b], 0.5).await.unwrap();
        store.reinforce(&[a, b], 0.5).await.unwrap();

        assert_eq!(activation_of(&store, a).await, 1.0);
        let fact = store.get_fact(a).await.unwrap().unwrap();
        assert_eq!(fact.access_count, 2);
        assert!(fact.last_accessed.is_some());

        let pair = store.co_occurrence(b, a).await.unwrap().unwrap();
        assert_eq!((pair.fact_a, pair.fact_b, pair.count), (a, b, 2));

        let associations = store.strongest_associations(a, 5).await.unwrap();
        assert_eq!(associations.len(), 1);
        assert_eq!(associations[0].0.id, b);
        assert_eq!(associations[0].1, 2);
    }

    #[tokio::test]
    async fn test_decay_batches_and_floor() {
        let store = setup_test_db().await;
        let mut ids = Vec::new();
        for value in ["a", "b", "c"] {
            ids.push(
                store
                    .upsert_fact(&NewFact::new("E", "k", value))
                    .await
                    .unwrap()
                    .id(),
            );
        }
        store.reinforce(&ids[..2], 1.0).await.unwrap();
        store.reinforce(&ids[..1], 1.0).await.unwrap();

        // First batch covers ids[0] and ids[1]; the floor zeroes nothing at 0.5
        let first = store.decay_batch(0, 2, 0.5, 0.01).await.unwrap().unwrap();
        assert_eq!(first.last_id, ids[1]);
        assert_eq!(first.decayed, 2);
        assert_eq!(activation_of(&store, ids[0]).await, 1.0);
        assert_eq!(activation_of(&store, ids[1]).await, 0.5);

        // Untouched fact with activation 0 is skipped
        let second = store
            .decay_batch(first.last_id, 2, 0.5, 0.01)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.decayed, 0);
        assert!(
            store
                .decay_batch(second.last_id, 2, 0.5, 0.01)
                .await
                .unwrap()
                .is_none()
        );

        // A high floor snaps small activations to zero
        let snapped = store.decay_batch(0, 10, 0.5, 0.3).await.unwrap().unwrap();
        assert_eq!(snapped.zeroed, 1);
        assert_eq!(activation_of(&store, ids[1]).await, 0.0);
    }

    #[tokio::test]
    async fn test_decay_preview_does_not_write() {
        let store = setup_test_db().await;
        let id = store
            .upsert_fact(&NewFact::new("E", "k", "v"))
            .await
            .unwrap()
            .id();
        store.reinforce(&[id], 2.5).await.unwrap();

        let preview = store.decay_preview(0.5, 0.01).await.unwrap();
        assert_eq!(preview.would_decay, 1);
        assert_eq!(preview.tiers_before.hot, 1);
        assert_eq!(preview.tiers_after.warm, 1);
        assert_eq!(activation_of(&store, id).await, 2.5);
    }

    #[tokio::test]
    async fn test_ingest_record() {
        let store = setup_test_db().await;
        let record = EntityRecord::new("Heidi", FactCategory::Person)
            .with_attribute("phone", "555-0100")
            .with_attribute("relationship", "mother")
            .with_alias("Mama");

        let report = store.ingest_record(&record).await.unwrap();
        assert_eq!(report.facts_inserted, 2);
        assert_eq!(report.aliases_added, 1);

        let again = store.ingest_record(&record).await.unwrap();
        assert_eq!(again.facts_inserted, 0);
        assert_eq!(again.facts_existing, 2);
        assert_eq!(again.aliases_added, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = setup_test_db().await;
        store
            .upsert_fact(&NewFact::new("User", "name", "Sam").permanent())
            .await
            .unwrap();
        store
            .upsert_fact(&NewFact::new("Keystone", "port", "3055").with_category(FactCategory::Project))
            .await
            .unwrap();
        store.add_alias("me", "User").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_facts, 2);
        assert_eq!(stats.permanent_facts, 1);
        assert_eq!(stats.total_aliases, 1);
        assert_eq!(stats.tiers.cool, 2);
        assert_eq!(stats.coldest.len(), 1);
        assert_eq!(stats.coldest[0].entity, "Keystone");
        assert!(stats.facts_by_category.contains(&(FactCategory::Project, 1)));
    }

    #[tokio::test]
    async fn test_decay_run_audit() {
        let store = setup_test_db().await;
        let run = DecayRun {
            ran_at: Utc::now(),
            decay_factor: 0.95,
            facts_decayed: 3,
            facts_zeroed: 1,
            batches: 1,
            duration_ms: 4,
        };
        store.record_decay_run(&run).await.unwrap();

        let runs = store.recent_decay_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].facts_decayed, 3);
    }

    #[tokio::test]
    async fn test_decay_lease_excludes_other_holders() {
        let store = setup_test_db().await;

        assert!(store.acquire_decay_lease("a", 60).await.unwrap());
        assert!(!store.acquire_decay_lease("b", 60).await.unwrap());
        // The holder may renew its own lease
        assert!(store.acquire_decay_lease("a", 60).await.unwrap());

        // Releasing someone else's lease is a no-op
        store.release_decay_lease("b").await.unwrap();
        assert!(!store.acquire_decay_lease("b", 60).await.unwrap());

        store.release_decay_lease("a").await.unwrap();
        assert!(store.acquire_decay_lease("b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_decay_lease_is_taken_over() {
        let store = setup_test_db().await;

        assert!(store.acquire_decay_lease("crashed", -1).await.unwrap());
        assert!(store.acquire_decay_lease("b", 60).await.unwrap());
        assert!(!store.acquire_decay_lease("crashed", 60).await.unwrap());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let rfc = parse_timestamp("2024-05-01T10:00:00+00:00");
        let sqlite = parse_timestamp("2024-05-01 10:00:00");
        assert_eq!(rfc, sqlite);
    }
}
