//! Process-wide holder for the most recently fetched release catalog.

use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::ReleaseCatalog;

/// A fully parsed catalog plus where and when it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSnapshot {
    pub catalog: ReleaseCatalog,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

impl CatalogSnapshot {
    pub fn new(catalog: ReleaseCatalog, source: impl Into<String>) -> Self {
        Self {
            catalog,
            fetched_at: Utc::now(),
            source: source.into(),
        }
    }
}

/// Last-writer-wins catalog slot.
///
/// Readers get an `Arc` to the snapshot current at the time of the call and
/// keep it for as long as they need, unaffected by later replacements.
#[derive(Debug, Default)]
pub struct CatalogStore {
    current: RwLock<Option<Arc<CatalogSnapshot>>>,
}

static SHARED: OnceLock<Arc<CatalogStore>> = OnceLock::new();

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide store.
    pub fn shared() -> Arc<CatalogStore> {
        SHARED.get_or_init(|| Arc::new(CatalogStore::new())).clone()
    }

    pub fn snapshot(&self) -> Option<Arc<CatalogSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, snapshot: CatalogSnapshot) -> Arc<CatalogSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        snapshot
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
