//! Factgraph CLI - knowledge-graph memory for conversational agents

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use factgraph_core::config::Config;
use factgraph_core::engine::SearchEngine;
use factgraph_core::graph::{FactCategory, GraphRepository, NewFact, NewRelation, SqliteGraphStore};
use factgraph_core::host;
use factgraph_core::search::{AliasResolver, Resolution, SearchResult};
use factgraph_core::storage::{Database, DatabaseConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "factgraph")]
#[command(author, version, about = "Knowledge-graph memory for conversational agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Fact store path (overrides FACTS_DB and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the graph
    Query {
        /// Free-text question
        text: String,
        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Minimum score a result needs
        #[arg(short = 's', long)]
        min_score: Option<u8>,
    },

    /// Build the context block for a user message (reads stdin when no message is given)
    Context {
        message: Option<String>,
    },

    /// Manage facts
    Fact {
        #[command(subcommand)]
        action: FactAction,
    },

    /// Manage relations
    Relation {
        #[command(subcommand)]
        action: RelationAction,
    },

    /// Manage aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },

    /// Run a decay sweep
    Decay {
        /// Report what the sweep would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show graph statistics and retention tiers
    Stats,

    /// Check the store and its full-text indexes
    Doctor {
        /// Rebuild the full-text indexes
        #[arg(long)]
        rebuild: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum FactAction {
    /// Add a fact
    Add {
        entity: String,
        key: String,
        value: String,
        /// Category (person, project, infrastructure, ...)
        #[arg(short, long, default_value = "other")]
        category: String,
        /// Retention weight in 0..=1
        #[arg(short, long)]
        importance: Option<f64>,
        /// Mark the fact permanent
        #[arg(long)]
        permanent: bool,
        /// Provenance
        #[arg(long)]
        source: Option<String>,
    },
    /// Remove a fact by id
    Rm { id: i64 },
    /// List facts
    List {
        /// Only facts for this entity
        #[arg(short, long)]
        entity: Option<String>,
        /// Only facts in this category
        #[arg(short, long)]
        category: Option<String>,
    },
}

#[derive(Subcommand)]
enum RelationAction {
    /// Add a relation
    Add {
        subject: String,
        predicate: String,
        object: String,
        #[arg(short, long)]
        weight: Option<f64>,
        #[arg(long)]
        source: Option<String>,
    },
    /// Remove a relation by id
    Rm { id: i64 },
}

#[derive(Subcommand)]
enum AliasAction {
    /// Map an alias to an entity
    Add { alias: String, entity: String },
    /// Remove an alias (for one entity, or for all)
    Rm { alias: String, entity: Option<String> },
    /// Show which entities a name resolves to
    Resolve { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so --json output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("factgraph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Config { action } => return cmd_config(action, cli.quiet),
        command => command,
    };

    let config = Config::load()?;
    let db = open_database(&config, cli.db).await?;
    let store = Arc::new(SqliteGraphStore::new(db.pool().clone()));

    let result = match command {
        Commands::Query {
            text,
            top_k,
            min_score,
        } => {
            let engine = SearchEngine::new(store, &config);
            let top_k = top_k.unwrap_or(config.search.top_k);
            let min_score = min_score.unwrap_or(config.search.min_score);
            cmd_query(&engine, &text, top_k, min_score, cli.json).await
        }
        Commands::Context { message } => {
            let engine = SearchEngine::new(store, &config);
            cmd_context(&engine, &config, message).await
        }
        Commands::Fact { action } => cmd_fact(&store, action, cli.json, cli.quiet).await,
        Commands::Relation { action } => cmd_relation(&store, action, cli.quiet).await,
        Commands::Alias { action } => cmd_alias(store, action, cli.json).await,
        Commands::Decay { dry_run } => {
            let engine = SearchEngine::new(store, &config);
            cmd_decay(&engine, dry_run, cli.json).await
        }
        Commands::Stats => cmd_stats(&store, cli.json).await,
        Commands::Doctor { rebuild } => cmd_doctor(&db, &store, rebuild, cli.quiet).await,
        Commands::Config { .. } => Ok(()),
    };

    db.close().await;
    result
}

async fn open_database(config: &Config, path: Option<PathBuf>) -> anyhow::Result<Database> {
    let db_config = match path {
        Some(path) => DatabaseConfig::with_path(path)
            .max_connections(config.store.max_connections)
            .busy_timeout(std::time::Duration::from_millis(config.store.busy_timeout_ms)),
        None => DatabaseConfig::from_store_config(&config.store),
    };
    Database::new(db_config).await
}

fn parse_category(value: &str) -> anyhow::Result<FactCategory> {
    FactCategory::parse(value).ok_or_else(|| {
        let known: Vec<&str> = FactCategory::all().iter().map(|c| c.as_str()).collect();
        anyhow::anyhow!("Unknown category '{}'. Expected one of: {}", value, known.join(", "))
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_query(
    engine: &SearchEngine<SqliteGraphStore>,
    text: &str,
    top_k: usize,
    min_score: u8,
    json: bool,
) -> anyhow::Result<()> {
    let results = engine.try_search(text, top_k, min_score).await?;

    if json {
        return print_json(&results);
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for result in &results {
        print_result(result);
    }
    Ok(())
}

fn print_result(result: &SearchResult) {
    println!(
        "[{:>3}] {} | {} ({} #{}, phase {})",
        result.score,
        result.group_key(),
        result.answer,
        result.source,
        result.row_id,
        result.phase.number()
    );
}

async fn cmd_context(
    engine: &SearchEngine<SqliteGraphStore>,
    config: &Config,
    message: Option<String>,
) -> anyhow::Result<()> {
    let message = match message {
        Some(message) => message,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let results = host::recall(
        engine,
        &message,
        config.search.top_k,
        config.search.min_score,
        config.host.timeout(),
    )
    .await;

    if let Some(block) = host::format_context_block(&results, config.host.max_context_chars) {
        println!("{}", block);
    }
    Ok(())
}

async fn cmd_fact(
    store: &SqliteGraphStore,
    action: FactAction,
    json: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        FactAction::Add {
            entity,
            key,
            value,
            category,
            importance,
            permanent,
            source,
        } => {
            let mut fact = NewFact::new(entity, key, value).with_category(parse_category(&category)?);
            if let Some(importance) = importance {
                fact = fact.with_importance(importance);
            }
            if permanent {
                fact = fact.permanent();
            }
            if let Some(source) = source {
                fact = fact.with_source(source);
            }

            let outcome = store.upsert_fact(&fact).await?;
            if !quiet {
                if outcome.is_inserted() {
                    println!("Fact #{} added.", outcome.id());
                } else {
                    println!("Fact already stored as #{}.", outcome.id());
                }
            }
        }
        FactAction::Rm { id } => {
            if !store.delete_fact(id).await? {
                return Err(anyhow::anyhow!(
                    "Fact #{} not found. Run `factgraph fact list` to see stored facts.",
                    id
                ));
            }
            if !quiet {
                println!("Fact #{} removed.", id);
            }
        }
        FactAction::List { entity, category } => {
            let category = category.as_deref().map(parse_category).transpose()?;
            let facts = store.list_facts(entity.as_deref(), category).await?;

            if json {
                return print_json(&facts);
            }
            if facts.is_empty() {
                if !quiet {
                    println!("No facts found.");
                }
                return Ok(());
            }
            for fact in facts {
                println!(
                    "  #{:<5} {} | {} = {} [{}, importance {:.2}, activation {:.2}, {}]",
                    fact.id,
                    fact.entity,
                    fact.key,
                    fact.value,
                    fact.category,
                    fact.importance,
                    fact.activation,
                    fact.tier()
                );
            }
        }
    }
    Ok(())
}

async fn cmd_relation(store: &SqliteGraphStore, action: RelationAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        RelationAction::Add {
            subject,
            predicate,
            object,
            weight,
            source,
        } => {
            let mut relation = NewRelation::new(subject, predicate, object);
            if let Some(weight) = weight {
                relation = relation.with_weight(weight);
            }
            if let Some(source) = source {
                relation = relation.with_source(source);
            }

            let outcome = store.upsert_relation(&relation).await?;
            if !quiet {
                if outcome.is_inserted() {
                    println!("Relation #{} added.", outcome.id());
                } else {
                    println!("Relation already stored as #{}.", outcome.id());
                }
            }
        }
        RelationAction::Rm { id } => {
            if !store.delete_relation(id).await? {
                return Err(anyhow::anyhow!("Relation #{} not found.", id));
            }
            if !quiet {
                println!("Relation #{} removed.", id);
            }
        }
    }
    Ok(())
}

async fn cmd_alias(store: Arc<SqliteGraphStore>, action: AliasAction, json: bool) -> anyhow::Result<()> {
    match action {
        AliasAction::Add { alias, entity } => {
            if store.add_alias(&alias, &entity).await? {
                println!("Alias '{}' -> {} added.", alias, entity);
            } else {
                println!("Alias '{}' -> {} already exists.", alias, entity);
            }
        }
        AliasAction::Rm { alias, entity } => {
            let removed = store.remove_alias(&alias, entity.as_deref()).await?;
            if removed == 0 {
                warn!(alias = %alias, "No alias removed");
            }
            println!("Removed {} alias mapping(s).", removed);
        }
        AliasAction::Resolve { name } => {
            let resolution = AliasResolver::new(store).resolve(&name).await?;
            if json {
                return print_json(&resolution);
            }
            match resolution {
                Resolution::Unresolved => println!("'{}' does not resolve to any entity.", name),
                Resolution::Unique(entity) => println!("{}", entity),
                Resolution::Ambiguous(entities) => {
                    println!("'{}' is ambiguous:", name);
                    for entity in entities {
                        println!("  {}", entity);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_decay(engine: &SearchEngine<SqliteGraphStore>, dry_run: bool, json: bool) -> anyhow::Result<()> {
    if dry_run {
        let preview = engine.decay_preview().await?;
        if json {
            return print_json(&preview);
        }
        println!("Dry run: {} facts would decay, {} would reach zero.", preview.would_decay, preview.would_zero);
        println!(
            "  Tiers now:   hot {} / warm {} / cool {}",
            preview.tiers_before.hot, preview.tiers_before.warm, preview.tiers_before.cool
        );
        println!(
            "  Tiers after: hot {} / warm {} / cool {}",
            preview.tiers_after.hot, preview.tiers_after.warm, preview.tiers_after.cool
        );
        return Ok(());
    }

    let report = engine.decay().await?;
    info!(duration_ms = report.run.duration_ms, "Decay finished");
    if json {
        return print_json(&report);
    }
    println!(
        "Decayed {} facts in {} batch(es); {} reached zero.",
        report.run.facts_decayed, report.run.batches, report.run.facts_zeroed
    );
    println!(
        "  Tiers: hot {} / warm {} / cool {}",
        report.tiers.hot, report.tiers.warm, report.tiers.cool
    );
    Ok(())
}

async fn cmd_stats(store: &SqliteGraphStore, json: bool) -> anyhow::Result<()> {
    let stats = store.stats().await?;
    if json {
        return print_json(&stats);
    }

    println!("Factgraph Statistics");
    println!("====================");
    println!("Facts:          {} ({} permanent)", stats.total_facts, stats.permanent_facts);
    println!("Relations:      {}", stats.total_relations);
    println!("Aliases:        {}", stats.total_aliases);
    println!("Co-occurrences: {}", stats.co_occurrence_pairs);
    println!("Avg activation: {:.3}", stats.average_activation);
    println!();
    println!("Tiers: hot {} / warm {} / cool {}", stats.tiers.hot, stats.tiers.warm, stats.tiers.cool);

    if !stats.facts_by_category.is_empty() {
        println!();
        println!("By category:");
        for (category, count) in &stats.facts_by_category {
            println!("  {:<15} {}", category.as_str(), count);
        }
    }

    if !stats.coldest.is_empty() {
        println!();
        println!("Coldest facts:");
        for fact in &stats.coldest {
            println!("  #{:<5} {} | {} = {} ({:.3})", fact.id, fact.entity, fact.key, fact.value, fact.activation);
        }
    }

    let runs = store.recent_decay_runs(1).await?;
    if let Some(run) = runs.first() {
        println!();
        println!(
            "Last decay: {} (factor {}, {} facts)",
            run.ran_at.format("%Y-%m-%d %H:%M:%S"),
            run.decay_factor,
            run.facts_decayed
        );
    }
    Ok(())
}

async fn cmd_doctor(db: &Database, store: &SqliteGraphStore, rebuild: bool, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Factgraph Health Check");
        println!("======================");
        println!();
    }

    let mut all_ok = true;

    match Config::config_path() {
        Ok(path) if path.exists() => {
            if !quiet {
                println!("[OK] Config file: {}", path.display());
            }
        }
        Ok(path) => {
            if !quiet {
                println!("[--] Config file: {} (using defaults)", path.display());
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Config file: Error - {}", e);
            }
        }
    }

    match db.health_check().await {
        Ok(()) => {
            if !quiet {
                println!("[OK] Store: {}", db.path().display());
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Store: {} - {}", db.path().display(), e);
            }
        }
    }

    let status = db.migration_status().await?;
    if status.needs_migration {
        all_ok = false;
        if !quiet {
            println!(
                "[!!] Schema: version {} of {}",
                status.current_version, status.target_version
            );
        }
    } else if !quiet {
        println!("[OK] Schema: version {}", status.current_version);
    }

    if rebuild {
        store.rebuild_indexes().await?;
        if !quiet {
            println!("[OK] Full-text indexes rebuilt");
        }
    }

    for check in store.check_indexes().await? {
        if check.healthy {
            if !quiet {
                println!("[OK] Index {}", check.index);
            }
        } else {
            all_ok = false;
            if !quiet {
                println!(
                    "[!!] Index {}: {}",
                    check.index,
                    check.detail.as_deref().unwrap_or("integrity check failed")
                );
                println!("     Run `factgraph doctor --rebuild`");
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks need attention.");
        }
    }

    if !all_ok {
        warn!("Health check found problems");
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
