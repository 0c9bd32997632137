//! Resumable job state.
//!
//! A [`JobCheckpoint`] is everything needed to continue a job in another
//! process: the query, the tiling that produced its units, how far each unit
//! got, and the candidates already admitted. The admitted candidates are
//! replayed through a fresh dedup engine on resume, which reproduces the same
//! identity keys, so nothing stored earlier is emitted under a new key.

use crate::error::{Result, UnitFailure};
use chrono::{DateTime, Utc};
use leadscout_core::{LeadCandidate, Query, TileId, TilingConfig, UnitKey};
use leadscout_db::CheckpointStore;
use leadscout_sources::Cursor;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Durable snapshot of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCheckpoint {
    /// Job this checkpoint belongs to
    pub job_id: String,
    /// The query being run
    pub query: Query,
    /// Tiling settings the units were planned with
    pub tiling: TilingConfig,
    /// Tiles whose every unit has completed
    pub completed_tiles: BTreeSet<TileId>,
    /// Units whose candidate sequence ended
    pub completed_units: BTreeSet<UnitKey>,
    /// Position of the next page for units still in progress
    pub cursors: BTreeMap<UnitKey, Cursor>,
    /// Candidates each unit has produced so far
    pub yielded: BTreeMap<UnitKey, usize>,
    /// Units waiting on a challenge when the checkpoint was written
    pub suspended_units: BTreeSet<UnitKey>,
    /// Units that ended in failure
    pub failed_units: Vec<UnitFailure>,
    /// Candidates admitted to the dedup engine, in arrival order
    pub candidates: Vec<LeadCandidate>,
    /// Candidates produced by all units
    pub total_found: u64,
    /// Candidates refused because the lead limit was reached
    pub dropped_over_limit: u64,
    /// Whether the lead limit has been reached
    pub limit_reached: bool,
    /// When the job started
    pub created_at: DateTime<Utc>,
    /// When this snapshot was taken
    pub updated_at: DateTime<Utc>,
}

impl JobCheckpoint {
    /// Fresh checkpoint for a job that has not fetched anything.
    #[must_use]
    pub fn new(job_id: impl Into<String>, query: Query, tiling: TilingConfig) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            query,
            tiling,
            completed_tiles: BTreeSet::new(),
            completed_units: BTreeSet::new(),
            cursors: BTreeMap::new(),
            yielded: BTreeMap::new(),
            suspended_units: BTreeSet::new(),
            failed_units: Vec::new(),
            candidates: Vec::new(),
            total_found: 0,
            dropped_over_limit: 0,
            limit_reached: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Units from `planned` that still have work, in planned order.
    ///
    /// Failed units are included so a resumed job retries them.
    #[must_use]
    pub fn remaining_units(&self, planned: &[UnitKey]) -> Vec<UnitKey> {
        planned
            .iter()
            .filter(|unit| !self.completed_units.contains(unit))
            .cloned()
            .collect()
    }

    /// Where `unit` should continue from.
    #[must_use]
    pub fn position(&self, unit: &UnitKey) -> (Option<Cursor>, usize) {
        (
            self.cursors.get(unit).cloned(),
            self.yielded.get(unit).copied().unwrap_or(0),
        )
    }

    /// Record that `unit` accepted a page.
    pub fn advance(&mut self, unit: &UnitKey, cursor: Option<Cursor>, yielded: usize) {
        match cursor {
            Some(cursor) => {
                self.cursors.insert(unit.clone(), cursor);
            }
            None => {
                self.cursors.remove(unit);
            }
        }
        self.yielded.insert(unit.clone(), yielded);
    }

    /// Record that `unit` finished its sequence.
    ///
    /// The unit's tile is marked complete once every planned source has
    /// finished it.
    pub fn complete(&mut self, unit: &UnitKey) {
        self.cursors.remove(unit);
        self.suspended_units.remove(unit);
        self.failed_units.retain(|f| &f.unit != unit);
        self.completed_units.insert(unit.clone());

        let tile_done = self
            .query
            .sources
            .iter()
            .all(|source| {
                self.completed_units
                    .contains(&UnitKey::new(source.clone(), unit.tile.clone()))
            });
        if tile_done {
            self.completed_tiles.insert(unit.tile.clone());
        }
    }

    /// Record that `unit` failed; its cursor is kept for a later retry.
    pub fn fail(&mut self, failure: UnitFailure) {
        self.suspended_units.remove(&failure.unit);
        self.failed_units.retain(|f| f.unit != failure.unit);
        self.failed_units.push(failure);
    }

    /// Serialize to the stored form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the stored form.
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Write to `store`, stamping `updated_at`.
    pub async fn save(&mut self, store: &dyn CheckpointStore) -> Result<()> {
        self.updated_at = Utc::now();
        store.save(&self.job_id, &self.to_json()?).await?;
        tracing::debug!(
            job_id = %self.job_id,
            completed_units = self.completed_units.len(),
            candidates = self.candidates.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Read the checkpoint for `job_id` from `store`.
    pub async fn load(store: &dyn CheckpointStore, job_id: &str) -> Result<Option<Self>> {
        match store.load(job_id).await? {
            Some(payload) => Self::from_json(&payload).map(Some),
            None => Ok(None),
        }
    }
}
