//! In-memory storage for tests and runs without a database file.

use crate::checkpoints::CheckpointStore;
use crate::error::Result;
use crate::leads::{LeadFilter, LeadStats, LeadStore, PutOutcome};
use async_trait::async_trait;
use leadscout_core::CanonicalLead;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// [`LeadStore`] backed by a map keyed by identity key.
#[derive(Debug, Default)]
pub struct MemoryLeadStore {
    leads: RwLock<BTreeMap<String, CanonicalLead>>,
}

impl MemoryLeadStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored leads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.leads.read().expect("lead store lock").len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored lead, ordered by identity key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CanonicalLead> {
        self.leads
            .read()
            .expect("lead store lock")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn put(&self, lead: &CanonicalLead) -> Result<PutOutcome> {
        let mut leads = self.leads.write().expect("lead store lock");
        if leads.contains_key(&lead.identity_key) {
            return Ok(PutOutcome::Conflict);
        }
        leads.insert(lead.identity_key.clone(), lead.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn update(&self, lead: &CanonicalLead) -> Result<bool> {
        let mut leads = self.leads.write().expect("lead store lock");
        match leads.get_mut(&lead.identity_key) {
            Some(stored) => {
                *stored = lead.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, identity_key: &str) -> Result<bool> {
        let mut leads = self.leads.write().expect("lead store lock");
        Ok(leads.remove(identity_key).is_some())
    }

    async fn get(&self, identity_key: &str) -> Result<Option<CanonicalLead>> {
        let leads = self.leads.read().expect("lead store lock");
        Ok(leads.get(identity_key).cloned())
    }

    async fn query(&self, filter: &LeadFilter) -> Result<Vec<CanonicalLead>> {
        let leads = self.leads.read().expect("lead store lock");
        let mut matched: Vec<CanonicalLead> = leads
            .values()
            .filter(|lead| filter.matches(lead))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.first_seen
                .cmp(&b.first_seen)
                .then_with(|| a.identity_key.cmp(&b.identity_key))
        });
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn stats(&self) -> Result<LeadStats> {
        let leads = self.leads.read().expect("lead store lock");
        Ok(LeadStats::from_leads(leads.values()))
    }
}

/// [`CheckpointStore`] backed by a map keyed by job id.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<BTreeMap<String, String>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, job_id: &str, payload: &str) -> Result<()> {
        self.checkpoints
            .write()
            .expect("checkpoint store lock")
            .insert(job_id.to_string(), payload.to_string());
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<String>> {
        Ok(self
            .checkpoints
            .read()
            .expect("checkpoint store lock")
            .get(job_id)
            .cloned())
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        Ok(self
            .checkpoints
            .write()
            .expect("checkpoint store lock")
            .remove(job_id)
            .is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .checkpoints
            .read()
            .expect("checkpoint store lock")
            .keys()
            .cloned()
            .collect())
    }
}
