//! In-memory registry of ready-to-use source adapters.

use crate::{
    adapter::SourceAdapter,
    adapters::build_adapter,
    definition::{SourceDefinition, SourceKind},
    error::{Result, SourceError},
    fetcher::PageFetcher,
    loader::SourceLoader,
};
use leadscout_core::SourceId;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Registry entry: the adapter plus its definition when it came from TOML.
#[derive(Clone)]
struct Entry {
    adapter: Arc<dyn SourceAdapter>,
    definition: Option<SourceDefinition>,
}

/// Adapters indexed by source ID.
///
/// New sources are added by registering another adapter; nothing that drives
/// the adapters needs to change.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    entries: Arc<RwLock<BTreeMap<SourceId, Entry>>>,
}

impl SourceRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every definition the loader finds.
    ///
    /// `markers` are the global challenge markers from configuration.
    pub fn load_from(
        loader: &SourceLoader,
        fetcher: Arc<dyn PageFetcher>,
        markers: &[String],
    ) -> Result<Self> {
        let registry = Self::new();
        for definition in loader.load_all()? {
            registry.insert_definition(definition, Arc::clone(&fetcher), markers)?;
        }
        info!(count = registry.count(), "registered sources");
        Ok(registry)
    }

    /// Build and register the adapter for one definition.
    pub fn insert_definition(
        &self,
        definition: SourceDefinition,
        fetcher: Arc<dyn PageFetcher>,
        markers: &[String],
    ) -> Result<()> {
        let adapter = build_adapter(definition.clone(), fetcher, markers)?;
        debug!(source_id = %definition.id(), kind = %definition.kind(), "registered source");
        self.write().insert(
            definition.id().clone(),
            Entry {
                adapter,
                definition: Some(definition),
            },
        );
        Ok(())
    }

    /// Register a hand-written adapter, replacing any adapter with the same ID.
    pub fn register(&self, adapter: Arc<dyn SourceAdapter>) {
        debug!(source_id = %adapter.id(), "registered custom source");
        self.write().insert(
            adapter.id().clone(),
            Entry {
                adapter,
                definition: None,
            },
        );
    }

    /// Get an adapter by ID.
    pub fn get(&self, source_id: &SourceId) -> Result<Arc<dyn SourceAdapter>> {
        self.read()
            .get(source_id)
            .map(|entry| Arc::clone(&entry.adapter))
            .ok_or_else(|| SourceError::NotFound {
                source_id: source_id.to_string(),
            })
    }

    /// Definition behind an adapter, if it was loaded from TOML.
    #[must_use]
    pub fn definition(&self, source_id: &SourceId) -> Option<SourceDefinition> {
        self.read()
            .get(source_id)
            .and_then(|entry| entry.definition.clone())
    }

    /// All loaded definitions in ID order.
    #[must_use]
    pub fn definitions(&self) -> Vec<SourceDefinition> {
        self.read()
            .values()
            .filter_map(|entry| entry.definition.clone())
            .collect()
    }

    /// Definitions of one adapter variant.
    #[must_use]
    pub fn by_kind(&self, kind: SourceKind) -> Vec<SourceDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| d.kind() == kind)
            .collect()
    }

    /// Whether an adapter is registered.
    #[must_use]
    pub fn contains(&self, source_id: &SourceId) -> bool {
        self.read().contains_key(source_id)
    }

    /// Registered IDs in order.
    #[must_use]
    pub fn ids(&self) -> Vec<SourceId> {
        self.read().keys().cloned().collect()
    }

    /// Number of registered adapters.
    #[must_use]
    pub fn count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<SourceId, Entry>> {
        self.entries.read().expect("acquire read lock on sources")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<SourceId, Entry>> {
        self.entries.write().expect("acquire write lock on sources")
    }
}
