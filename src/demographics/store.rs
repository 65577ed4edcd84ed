//! Sources of demographic weight/bias tables.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error};

use crate::demographics::{AgeGroup, DemographicKey, DemographicScoreTable, Gender};
use crate::error::{AppError, Result};

/// Loads the tables for a model version.
///
/// A version with no tables is an error, never an empty table.
#[async_trait]
pub trait DemographicStore: Send + Sync {
    async fn load(&self, model_version: &str) -> Result<DemographicScoreTable>;
}

/// One row of a `<version>-weight.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightRecord {
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub age: Option<AgeGroup>,
    pub weights: Vec<f64>,
}

/// One row of a `<version>-bias.json` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasRecord {
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub age: Option<AgeGroup>,
    pub bias: f64,
}

/// Reads `<root>/<version>-weight.json` and `<root>/<version>-bias.json`.
#[derive(Debug, Clone)]
pub struct FileDemographicStore {
    root: PathBuf,
}

impl FileDemographicStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn weights_path(&self, model_version: &str) -> PathBuf {
        self.root.join(format!("{}-weight.json", model_version))
    }

    pub fn bias_path(&self, model_version: &str) -> PathBuf {
        self.root.join(format!("{}-bias.json", model_version))
    }

    async fn read_records<T: for<'de> Deserialize<'de>>(
        path: &Path,
        model_version: &str,
    ) -> Result<Vec<T>> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            error!("Could not read a valid model file at {}: {}", path.display(), e);
            AppError::DemographicLoad {
                model_version: model_version.to_string(),
                reason: format!("{}: {}", path.display(), e),
            }
        })?;
        serde_json::from_slice(&raw).map_err(|e| AppError::DemographicLoad {
            model_version: model_version.to_string(),
            reason: format!("{}: {}", path.display(), e),
        })
    }
}

#[async_trait]
impl DemographicStore for FileDemographicStore {
    async fn load(&self, model_version: &str) -> Result<DemographicScoreTable> {
        validate_version(model_version)?;

        let weight_path = self.weights_path(model_version);
        let bias_path = self.bias_path(model_version);
        debug!(
            "Loading demographic tables for {} from {}",
            model_version,
            self.root.display()
        );

        let weight_rows: Vec<WeightRecord> =
            Self::read_records(&weight_path, model_version).await?;
        let bias_rows: Vec<BiasRecord> = Self::read_records(&bias_path, model_version).await?;

        let weights = weight_rows
            .into_iter()
            .map(|r| (DemographicKey::new(r.gender, r.age), r.weights))
            .collect();
        let biases = bias_rows
            .into_iter()
            .map(|r| (DemographicKey::new(r.gender, r.age), r.bias))
            .collect();

        DemographicScoreTable::new(model_version, weights, biases)
    }
}

/// Model versions become file names; keep them to a single path component.
fn validate_version(model_version: &str) -> Result<()> {
    if model_version.is_empty()
        || model_version.contains(['/', '\\', '\0'])
        || model_version.contains("..")
    {
        return Err(AppError::DemographicLoad {
            model_version: model_version.to_string(),
            reason: "model version is not a valid table name".to_string(),
        });
    }
    Ok(())
}

/// Tables held in memory, keyed by model version. Counts loads.
#[derive(Debug, Default)]
pub struct MemoryDemographicStore {
    tables: HashMap<String, DemographicScoreTable>,
    loads: AtomicUsize,
}

impl MemoryDemographicStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: DemographicScoreTable) -> Self {
        self.tables.insert(table.model_version().to_string(), table);
        self
    }

    /// Number of `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DemographicStore for MemoryDemographicStore {
    async fn load(&self, model_version: &str) -> Result<DemographicScoreTable> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.tables
            .get(model_version)
            .cloned()
            .ok_or_else(|| AppError::DemographicLoad {
                model_version: model_version.to_string(),
                reason: "no tables registered".to_string(),
            })
    }
}
