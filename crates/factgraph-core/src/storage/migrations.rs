//! Database migrations
//!
//! This module manages the SQLite schema of the fact store.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Graph schema with full-text shadow indexes
const MIGRATION_V1: &str = r#"
    -- Facts: (entity, key, value) triples, several values per key allowed
    CREATE TABLE IF NOT EXISTS facts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity TEXT NOT NULL,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT 'other',
        importance REAL NOT NULL DEFAULT 0.5 CHECK (importance >= 0.0 AND importance <= 1.0),
        activation REAL NOT NULL DEFAULT 0.0,
        source TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_accessed TIMESTAMP,
        access_count INTEGER NOT NULL DEFAULT 0,
        UNIQUE (entity, key, value)
    );

    CREATE INDEX IF NOT EXISTS idx_facts_entity ON facts(entity COLLATE NOCASE);
    CREATE INDEX IF NOT EXISTS idx_facts_entity_key ON facts(entity COLLATE NOCASE, key);
    CREATE INDEX IF NOT EXISTS idx_facts_category ON facts(category);
    CREATE INDEX IF NOT EXISTS idx_facts_activation ON facts(activation);

    -- Relations: directed, weighted edges
    CREATE TABLE IF NOT EXISTS relations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object TEXT NOT NULL,
        weight REAL NOT NULL DEFAULT 1.0,
        source TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (subject, predicate, object)
    );

    CREATE INDEX IF NOT EXISTS idx_relations_subject ON relations(subject COLLATE NOCASE);
    CREATE INDEX IF NOT EXISTS idx_relations_object ON relations(object COLLATE NOCASE);

    -- Aliases: surface form -> canonical entity
    CREATE TABLE IF NOT EXISTS aliases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        alias TEXT NOT NULL COLLATE NOCASE,
        entity TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (alias, entity)
    );

    CREATE INDEX IF NOT EXISTS idx_aliases_alias ON aliases(alias);
    CREATE INDEX IF NOT EXISTS idx_aliases_entity ON aliases(entity);

    -- Co-occurrences: unordered fact pairs stored with fact_a < fact_b
    CREATE TABLE IF NOT EXISTS co_occurrences (
        fact_a INTEGER NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
        fact_b INTEGER NOT NULL REFERENCES facts(id) ON DELETE CASCADE,
        count INTEGER NOT NULL DEFAULT 1,
        last_wired TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (fact_a, fact_b),
        CHECK (fact_a < fact_b)
    );

    CREATE INDEX IF NOT EXISTS idx_co_occurrences_b ON co_occurrences(fact_b);

    -- Full-text shadow index over facts
    CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts USING fts5(
        entity,
        key,
        value,
        content='facts',
        content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS facts_ai AFTER INSERT ON facts BEGIN
        INSERT INTO facts_fts(rowid, entity, key, value)
        VALUES (NEW.id, NEW.entity, NEW.key, NEW.value);
    END;

    CREATE TRIGGER IF NOT EXISTS facts_ad AFTER DELETE ON facts BEGIN
        INSERT INTO facts_fts(facts_fts, rowid, entity, key, value)
        VALUES ('delete', OLD.id, OLD.entity, OLD.key, OLD.value);
    END;

    -- Only content changes touch the index; activation bumps do not
    CREATE TRIGGER IF NOT EXISTS facts_au AFTER UPDATE OF entity, key, value ON facts BEGIN
        INSERT INTO facts_fts(facts_fts, rowid, entity, key, value)
        VALUES ('delete', OLD.id, OLD.entity, OLD.key, OLD.value);
        INSERT INTO facts_fts(rowid, entity, key, value)
        VALUES (NEW.id, NEW.entity, NEW.key, NEW.value);
    END;

    -- Full-text shadow index over relations
    CREATE VIRTUAL TABLE IF NOT EXISTS relations_fts USING fts5(
        subject,
        predicate,
        object,
        content='relations',
        content_rowid='id'
    );

    CREATE TRIGGER IF NOT EXISTS relations_ai AFTER INSERT ON relations BEGIN
        INSERT INTO relations_fts(rowid, subject, predicate, object)
        VALUES (NEW.id, NEW.subject, NEW.predicate, NEW.object);
    END;

    CREATE TRIGGER IF NOT EXISTS relations_ad AFTER DELETE ON relations BEGIN
        INSERT INTO relations_fts(relations_fts, rowid, subject, predicate, object)
        VALUES ('delete', OLD.id, OLD.subject, OLD.predicate, OLD.object);
    END;

    CREATE TRIGGER IF NOT EXISTS relations_au AFTER UPDATE OF subject, predicate, object ON relations BEGIN
        INSERT INTO relations_fts(relations_fts, rowid, subject, predicate, object)
        VALUES ('delete', OLD.id, OLD.subject, OLD.predicate, OLD.object);
        INSERT INTO relations_fts(rowid, subject, predicate, object)
        VALUES (NEW.id, NEW.subject, NEW.predicate, NEW.object);
    END;
"#;

/// Migration 2: Decay sweep audit log
const MIGRATION_V2: &str = r#"
    CREATE TABLE IF NOT EXISTS decay_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ran_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        decay_factor REAL NOT NULL,
        facts_decayed INTEGER NOT NULL DEFAULT 0,
        facts_zeroed INTEGER NOT NULL DEFAULT 0,
        batches INTEGER NOT NULL DEFAULT 0,
        duration_ms INTEGER NOT NULL DEFAULT 0
    );

    CREATE INDEX IF NOT EXISTS idx_decay_runs_ran_at ON decay_runs(ran_at);
"#;

/// Migration 3: Single-row lease shared by every process sweeping the store
const MIGRATION_V3: &str = r#"
    CREATE TABLE IF NOT EXISTS decay_lease (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        holder TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    );
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    // Ensure migrations table exists
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Graph schema and full-text indexes");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Decay sweep audit log");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    if current_version < 3 {
        tracing::info!("Applying migration v3: Decay sweep lease");
        sqlx::raw_sql(MIGRATION_V3).execute(pool).await?;
        record_migration(pool, 3).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables = [
            "facts",
            "relations",
            "aliases",
            "co_occurrences",
            "facts_fts",
            "relations_fts",
            "decay_runs",
            "decay_lease",
        ];

        for table in tables {
            let result: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_fts_triggers_follow_content_changes() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO facts (entity, key, value) VALUES ('Keystone', 'port', '3055')")
            .execute(&pool)
            .await
            .unwrap();

        let hits = |term: &'static str| {
            let pool = pool.clone();
            async move {
                let (n,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM facts_fts WHERE facts_fts MATCH ?")
                        .bind(term)
                        .fetch_one(&pool)
                        .await
                        .unwrap();
                n
            }
        };

        assert_eq!(hits("\"3055\"").await, 1);

        sqlx::query("UPDATE facts SET value = '4000' WHERE entity = 'Keystone'")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(hits("\"3055\"").await, 0);
        assert_eq!(hits("\"4000\"").await, 1);

        sqlx::query("DELETE FROM facts")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(hits("\"4000\"").await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_triples_rejected() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let insert = "INSERT INTO relations (subject, predicate, object) VALUES ('A', 'uses', 'B')";
        sqlx::query(insert).execute(&pool).await.unwrap();
        assert!(sqlx::query(insert).execute(&pool).await.is_err());
    }
}
