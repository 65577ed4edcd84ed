//! Lazily-loaded, shared cache of demographic tables keyed by model version.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::demographics::{DemographicScoreTable, DemographicStore};
use crate::error::Result;

type TableCell = Arc<OnceCell<Arc<DemographicScoreTable>>>;

/// Caches one [`DemographicScoreTable`] per model version.
///
/// Concurrent first requests for the same version share a single load and
/// every caller gets the same `Arc`. A failed load is not cached; the next
/// request tries again.
pub struct DemographicRegistry {
    store: Arc<dyn DemographicStore>,
    tables: DashMap<String, TableCell>,
}

impl DemographicRegistry {
    pub fn new(store: Arc<dyn DemographicStore>) -> Self {
        Self {
            store,
            tables: DashMap::new(),
        }
    }

    /// Get the table for `model_version`, loading it on first use.
    pub async fn get(&self, model_version: &str) -> Result<Arc<DemographicScoreTable>> {
        let cell = self
            .tables
            .entry(model_version.to_string())
            .or_default()
            .clone();

        let result = cell
            .get_or_try_init(|| async {
                debug!("Loading demographic tables for model {}", model_version);
                self.store.load(model_version).await.map(Arc::new)
            })
            .await
            .map(Arc::clone);

        if result.is_err() {
            // Unknown versions must not accumulate empty cells.
            self.tables.remove_if(model_version, |_, existing| {
                Arc::ptr_eq(existing, &cell) && !existing.initialized()
            });
        }
        result
    }

    /// The table for `model_version` if it has already been loaded.
    pub fn cached(&self, model_version: &str) -> Option<Arc<DemographicScoreTable>> {
        self.tables
            .get(model_version)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of loaded tables.
    pub fn len(&self) -> usize {
        self.tables.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
