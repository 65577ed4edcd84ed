//! Per-model weight/bias tables turning a feature vector into a score.

use std::collections::{BTreeMap, HashMap};

use crate::demographics::DemographicKey;
use crate::error::{AppError, Result};

/// Weight vector and bias for every demographic of one model version.
///
/// The score for a demographic is `dot(weights, features) + bias`.
#[derive(Debug, Clone)]
pub struct DemographicScoreTable {
    model_version: String,
    dimension: usize,
    weights: HashMap<DemographicKey, Vec<f64>>,
    biases: HashMap<DemographicKey, f64>,
}

impl DemographicScoreTable {
    /// Build a table, checking that every weight vector has the same length
    /// and that weights and biases cover the same demographics.
    pub fn new(
        model_version: impl Into<String>,
        weights: HashMap<DemographicKey, Vec<f64>>,
        biases: HashMap<DemographicKey, f64>,
    ) -> Result<Self> {
        let model_version = model_version.into();
        let invalid = |reason: String| AppError::DemographicLoad {
            model_version: model_version.clone(),
            reason,
        };

        let dimension = weights
            .values()
            .next()
            .map(Vec::len)
            .ok_or_else(|| invalid("weight table is empty".to_string()))?;

        if let Some((key, w)) = weights.iter().find(|(_, w)| w.len() != dimension) {
            return Err(invalid(format!(
                "weight vector for {} has length {}, expected {}",
                key,
                w.len(),
                dimension
            )));
        }
        if let Some(key) = weights.keys().find(|k| !biases.contains_key(k)) {
            return Err(invalid(format!("no bias for demographic {}", key)));
        }
        if let Some(key) = biases.keys().find(|k| !weights.contains_key(k)) {
            return Err(invalid(format!("no weights for demographic {}", key)));
        }

        Ok(Self {
            model_version,
            dimension,
            weights,
            biases,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Expected feature vector length.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn contains(&self, key: &DemographicKey) -> bool {
        self.weights.contains_key(key)
    }

    /// All demographics in the table, in sorted order.
    pub fn keys(&self) -> Vec<DemographicKey> {
        let mut keys: Vec<_> = self.weights.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Score `features` for one demographic.
    pub fn score(&self, features: &[f64], key: DemographicKey) -> Result<f64> {
        let (weights, bias) = self.lookup(key)?;
        self.check_dimension(features)?;
        Ok(dot(weights, features) + bias)
    }

    /// Score `features` for every demographic in the table.
    pub fn all_scores(&self, features: &[f64]) -> Result<BTreeMap<DemographicKey, f64>> {
        self.check_dimension(features)?;
        Ok(self
            .weights
            .iter()
            .map(|(key, weights)| {
                let bias = self.biases.get(key).copied().unwrap_or_default();
                (*key, dot(weights, features) + bias)
            })
            .collect())
    }

    /// Per-feature contributions `weight_i * feature_i` as `(index, contribution)`,
    /// largest magnitude first.
    pub fn feature_importance(
        &self,
        features: &[f64],
        key: DemographicKey,
    ) -> Result<Vec<(usize, f64)>> {
        let (weights, _) = self.lookup(key)?;
        self.check_dimension(features)?;

        let mut importance: Vec<(usize, f64)> = weights
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .enumerate()
            .collect();
        importance.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        Ok(importance)
    }

    fn lookup(&self, key: DemographicKey) -> Result<(&[f64], f64)> {
        match (self.weights.get(&key), self.biases.get(&key)) {
            (Some(w), Some(b)) => Ok((w.as_slice(), *b)),
            _ => Err(AppError::UnknownDemographic {
                model_version: self.model_version.clone(),
                key,
            }),
        }
    }

    fn check_dimension(&self, features: &[f64]) -> Result<()> {
        if features.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: features.len(),
            });
        }
        Ok(())
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
