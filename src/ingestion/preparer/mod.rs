#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::Result;
use crate::config::Config;
use crate::database::lancedb::DistanceMetric;
use crate::database::lancedb::vector_store::{IndexStatus, VectorStore};

/// Makes sure the vector table matches the configured embedding model
/// before a run writes anything to it
#[derive(Clone)]
pub struct VectorStorePreparer {
    vector_store: Arc<VectorStore>,
    dimension: usize,
    metric: DistanceMetric,
}

impl VectorStorePreparer {
    #[inline]
    pub fn new(vector_store: Arc<VectorStore>, dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            vector_store,
            dimension,
            metric,
        }
    }

    #[inline]
    pub fn from_config(vector_store: Arc<VectorStore>, config: &Config) -> Self {
        Self::new(
            vector_store,
            config.ollama.embedding_dimension as usize,
            config.vector_store.distance_metric,
        )
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Ensure the index exists with the configured parameters. A mismatching
    /// index is a fatal error unless `purge` drops it first.
    #[instrument(skip(self), fields(table = self.vector_store.table_name()))]
    #[inline]
    pub async fn prepare(&self, purge: bool) -> Result<IndexStatus> {
        let status = self
            .vector_store
            .ensure_index(self.dimension, self.metric, purge)
            .await
            .inspect_err(|e| error!("Vector store preparation failed: {}", e))?;

        match status {
            IndexStatus::Created => info!(
                "Created vector table ({} dimensions, {})",
                self.dimension, self.metric
            ),
            IndexStatus::Recreated => info!(
                "Recreated vector table ({} dimensions, {}), previous vectors discarded",
                self.dimension, self.metric
            ),
            IndexStatus::Existing => {}
        }
        Ok(status)
    }
}
