//! Dataset lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use turnwise_core::Dataset;

use crate::RuntimeError;

/// Source of datasets by id.
#[async_trait]
pub trait DatasetRepository: Send + Sync {
    /// Fails with `NotFound` for unknown ids.
    async fn get_dataset(&self, dataset_id: &str) -> Result<Arc<Dataset>, RuntimeError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDatasetRepository {
    datasets: RwLock<BTreeMap<String, Arc<Dataset>>>,
}

impl InMemoryDatasetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a dataset.
    pub fn insert(&self, dataset: Dataset) {
        self.datasets
            .write()
            .insert(dataset.dataset_id.clone(), Arc::new(dataset));
    }

    /// Parse a dataset document and add it.
    pub fn insert_json(&self, json: &str) -> Result<String, RuntimeError> {
        let dataset: Dataset = serde_json::from_str(json)
            .map_err(|e| RuntimeError::InvalidArgument(format!("invalid dataset: {}", e)))?;
        let id = dataset.dataset_id.clone();
        self.insert(dataset);
        Ok(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.datasets.read().keys().cloned().collect()
    }
}

impl FromIterator<Dataset> for InMemoryDatasetRepository {
    fn from_iter<I: IntoIterator<Item = Dataset>>(iter: I) -> Self {
        let repo = Self::new();
        for dataset in iter {
            repo.insert(dataset);
        }
        repo
    }
}

#[async_trait]
impl DatasetRepository for InMemoryDatasetRepository {
    async fn get_dataset(&self, dataset_id: &str) -> Result<Arc<Dataset>, RuntimeError> {
        self.datasets
            .read()
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found("dataset", dataset_id))
    }
}
