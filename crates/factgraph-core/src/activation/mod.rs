//! Activation and decay
//!
//! Accepted results reinforce their facts on the read path. Decay is a separate
//! sweep that multiplies every activation by a factor below one, one committed
//! transaction per batch, and never touches importance or content.
//!
//! Sweeps are exclusive twice over: an in-process lock turns away overlapping calls
//! on one engine, and a lease row in the store turns away sweeps from other processes.

pub mod tier;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ActivationConfig;
use crate::error::{Error, Result};
use crate::graph::{DecayPreview, DecayRun, GraphRepository};
use crate::search::SearchResult;

pub use tier::{HOT_THRESHOLD, RetentionTier, TierCounts, WARM_THRESHOLD};

/// Seconds a sweep may hold the store lease before another process can take it over
pub const DECAY_LEASE_SECS: i64 = 600;

static NEXT_ENGINE: AtomicU64 = AtomicU64::new(0);

/// Summary of a completed sweep
#[derive(Debug, Clone, Serialize)]
pub struct DecayReport {
    pub run: DecayRun,
    pub tiers: TierCounts,
}

pub struct ActivationEngine<R: GraphRepository> {
    repo: Arc<R>,
    config: ActivationConfig,
    sweep: Mutex<()>,
    /// Lease owner name, unique per engine across processes
    holder: String,
}

impl<R: GraphRepository> ActivationEngine<R> {
    pub fn new(repo: Arc<R>, config: ActivationConfig) -> Self {
        Self {
            repo,
            config,
            sweep: Mutex::new(()),
            holder: format!(
                "{}-{}",
                std::process::id(),
                NEXT_ENGINE.fetch_add(1, Ordering::Relaxed)
            ),
        }
    }

    pub fn config(&self) -> &ActivationConfig {
        &self.config
    }

    /// Reinforce the facts in an accepted result set; relations carry no activation
    pub async fn reinforce(&self, results: &[SearchResult]) -> Result<usize> {
        let fact_ids: Vec<i64> = results.iter().filter_map(SearchResult::fact_id).collect();
        if fact_ids.is_empty() {
            return Ok(0);
        }

        self.repo
            .reinforce(&fact_ids, self.config.reinforcement_step)
            .await?;
        debug!(facts = fact_ids.len(), "Accepted results reinforced");
        Ok(fact_ids.len())
    }

    /// Run one decay sweep
    ///
    /// Fails with `DecayInProgress` without waiting when another sweep on this engine
    /// or in another process holds the store lease.
    pub async fn decay(&self) -> Result<DecayReport> {
        let _guard = self.sweep.try_lock().map_err(|_| Error::DecayInProgress)?;
        if !self.repo.acquire_decay_lease(&self.holder, DECAY_LEASE_SECS).await? {
            debug!(holder = %self.holder, "Decay lease held elsewhere");
            return Err(Error::DecayInProgress);
        }

        let outcome = self.run_sweep().await;
        if let Err(err) = self.repo.release_decay_lease(&self.holder).await {
            warn!(error = %err, "Failed to release decay lease; it lapses on expiry");
        }
        outcome
    }

    async fn run_sweep(&self) -> Result<DecayReport> {
        let started = Instant::now();
        let factor = self.config.decay_factor;
        let floor = self.config.activation_floor;

        let mut after_id = 0;
        let mut batches = 0;
        let mut facts_decayed = 0;
        let mut facts_zeroed = 0;

        while let Some(batch) = self
            .repo
            .decay_batch(after_id, self.config.decay_batch_size, factor, floor)
            .await?
        {
            after_id = batch.last_id;
            batches += 1;
            facts_decayed += batch.decayed;
            facts_zeroed += batch.zeroed;
            debug!(batch = batches, last_id = after_id, decayed = batch.decayed, "Decay batch committed");
        }

        let run = DecayRun {
            ran_at: Utc::now(),
            decay_factor: factor,
            facts_decayed,
            facts_zeroed,
            batches,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.repo.record_decay_run(&run).await?;
        let tiers = self.repo.tier_counts().await?;

        info!(
            decayed = facts_decayed,
            zeroed = facts_zeroed,
            batches,
            hot = tiers.hot,
            warm = tiers.warm,
            cool = tiers.cool,
            "Decay sweep completed"
        );
        Ok(DecayReport { run, tiers })
    }

    /// What `decay` would do right now, without writing
    pub async fn preview(&self) -> Result<DecayPreview> {
        self.repo
            .decay_preview(self.config.decay_factor, self.config.activation_floor)
            .await
    }

    pub async fn tiers(&self) -> Result<TierCounts> {
        self.repo.tier_counts().await
    }
}
