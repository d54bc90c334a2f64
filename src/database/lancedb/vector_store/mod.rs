
use super::{DistanceMetric, EmbeddingRecord};
use crate::{IngestError, Result, config::Config};
use arrow::array::{FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use lancedb::Connection;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Schema metadata key recording the distance metric the table was prepared for
const DISTANCE_METRIC_KEY: &str = "distance_metric";

/// Vector database store using LanceDB
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    /// Serializes delete+insert so a document's vectors are replaced as a unit
    write_lock: Mutex<()>,
}

/// What `ensure_index` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    /// The table was missing and has been created
    Created,
    /// A table with matching parameters already existed
    Existing,
    /// The table was dropped on request and created again
    Recreated,
}

/// Parameters of an existing vector table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSchema {
    pub dimension: usize,
    /// Absent for tables created without recorded metric
    pub distance_metric: Option<DistanceMetric>,
}

impl VectorStore {
    /// Open the vector database configured in `config`
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        Self::open(
            &config.vector_database_path(),
            &config.vector_store.table_name,
        )
        .await
    }

    /// Open (creating the directory if needed) the vector database at `db_path`
    #[inline]
    pub async fn open(db_path: &Path, table_name: &str) -> Result<Self> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path).map_err(|e| {
            IngestError::Database(format!("Failed to create vector database directory: {e}"))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| IngestError::Database(format!("Failed to connect to LanceDB: {e}")))?;

        Ok(Self {
            connection,
            table_name: table_name.to_string(),
            write_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[inline]
    pub async fn table_exists(&self) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| IngestError::Database(format!("Failed to list tables: {e}")))?;
        Ok(table_names.contains(&self.table_name))
    }

    /// Make sure the vector table exists with `dimension` and `metric`.
    ///
    /// Idempotent for matching parameters. An existing table with another
    /// dimension or metric is an error unless `purge` is set, in which case
    /// the table and all its vectors are dropped and created again.
    #[inline]
    pub async fn ensure_index(
        &self,
        dimension: usize,
        metric: DistanceMetric,
        purge: bool,
    ) -> Result<IndexStatus> {
        let _guard = self.write_lock.lock().await;

        if purge && self.table_exists().await? {
            warn!("Purging vector table {}", self.table_name);
            self.drop_table_unlocked().await?;
            self.create_table(dimension, metric).await?;
            return Ok(IndexStatus::Recreated);
        }

        if let Some(existing) = self.index_schema().await? {
            if existing.dimension != dimension {
                return Err(IngestError::SchemaMismatch {
                    expected: format!("dimension {dimension}"),
                    found: format!("dimension {}", existing.dimension),
                });
            }

            match existing.distance_metric {
                Some(found) if found != metric => {
                    return Err(IngestError::SchemaMismatch {
                        expected: format!("distance metric {metric}"),
                        found: format!("distance metric {found}"),
                    });
                }
                Some(_) => {}
                None => warn!(
                    "Vector table {} has no recorded distance metric, assuming {}",
                    self.table_name, metric
                ),
            }

            debug!(
                "Vector table {} already prepared ({} dimensions, {})",
                self.table_name, dimension, metric
            );
            return Ok(IndexStatus::Existing);
        }

        self.create_table(dimension, metric).await?;
        Ok(IndexStatus::Created)
    }

    /// Dimension and metric of the existing table, `None` when there is no table
    #[inline]
    pub async fn index_schema(&self) -> Result<Option<IndexSchema>> {
        if !self.table_exists().await? {
            return Ok(None);
        }

        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| IngestError::Database(format!("Failed to get table schema: {e}")))?;

        let dimension = schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                IngestError::Database(
                    "Could not find vector column or determine dimension".to_string(),
                )
            })?;

        let distance_metric = schema
            .metadata()
            .get(DISTANCE_METRIC_KEY)
            .and_then(|value| value.parse().ok());

        Ok(Some(IndexSchema {
            dimension,
            distance_metric,
        }))
    }

    fn create_schema(vector_dim: usize, metric: DistanceMetric) -> SchemaRef {
        let metadata = HashMap::from([(DISTANCE_METRIC_KEY.to_string(), metric.to_string())]);

        Arc::new(Schema::new_with_metadata(
            vec![
                Field::new("id", DataType::Utf8, false),
                Field::new(
                    "vector",
                    DataType::FixedSizeList(
                        Arc::new(Field::new("item", DataType::Float32, false)),
                        vector_dim as i32,
                    ),
                    false,
                ),
                Field::new("document_uri", DataType::Utf8, false),
                Field::new("content_fingerprint", DataType::Utf8, false),
                Field::new("chunk_index", DataType::UInt32, false),
                Field::new("content", DataType::Utf8, false),
                Field::new("source_url", DataType::Utf8, true),
                Field::new("document_metadata", DataType::Utf8, true),
                Field::new("created_at", DataType::Utf8, false),
            ],
            metadata,
        ))
    }

    async fn create_table(&self, dimension: usize, metric: DistanceMetric) -> Result<()> {
        let schema = Self::create_schema(dimension, metric);
        self.connection
            .create_empty_table(&self.table_name, schema)
            .execute()
            .await
            .map_err(|e| IngestError::Database(format!("Failed to create table: {e}")))?;

        info!(
            "Created vector table {} with {} dimensions ({})",
            self.table_name, dimension, metric
        );
        Ok(())
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| IngestError::Database(format!("Failed to open table: {e}")))
    }

    /// Replace every vector of `document_uri` with `records`.
    ///
    /// All records must belong to `document_uri` and match the table dimension.
    /// Returns the number of vectors written.
    #[inline]
    pub async fn replace_document_vectors(
        &self,
        document_uri: &str,
        records: &[EmbeddingRecord],
    ) -> Result<usize> {
        if let Some(stray) = records
            .iter()
            .find(|record| record.metadata.document_uri != document_uri)
        {
            return Err(IngestError::Database(format!(
                "Vector {} does not belong to document {}",
                stray.id, document_uri
            )));
        }

        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| IngestError::Database(format!("Failed to get table schema: {e}")))?;
        let record_batch = if records.is_empty() {
            None
        } else {
            Some(Self::create_record_batch(schema, records)?)
        };

        let _guard = self.write_lock.lock().await;

        table
            .delete(&Self::document_predicate(document_uri))
            .await
            .map_err(|e| {
                IngestError::Database(format!("Failed to delete document vectors: {e}"))
            })?;

        if let Some(record_batch) = record_batch {
            let schema = record_batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
            table
                .add(reader)
                .execute()
                .await
                .map_err(|e| IngestError::Database(format!("Failed to insert embeddings: {e}")))?;
        }

        debug!(
            "Stored {} vectors for document {}",
            records.len(),
            document_uri
        );
        Ok(records.len())
    }

    /// Remove every vector of `document_uri`
    #[inline]
    pub async fn delete_document_vectors(&self, document_uri: &str) -> Result<()> {
        let table = self.open_table().await?;
        let _guard = self.write_lock.lock().await;

        table
            .delete(&Self::document_predicate(document_uri))
            .await
            .map_err(|e| {
                IngestError::Database(format!("Failed to delete document vectors: {e}"))
            })?;

        Ok(())
    }

    fn document_predicate(document_uri: &str) -> String {
        format!("document_uri = '{}'", document_uri.replace('\'', "''"))
    }

    /// Create a RecordBatch from embedding records, using the table's schema
    fn create_record_batch(schema: SchemaRef, records: &[EmbeddingRecord]) -> Result<RecordBatch> {
        // The stored item field decides nullability, which LanceDB reports as nullable
        let (item_field, list_size) = schema
            .field_with_name("vector")
            .ok()
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(item, size) => Some((Arc::clone(item), *size)),
                _ => None,
            })
            .ok_or_else(|| IngestError::Database("Vector column missing from table".to_string()))?;
        let vector_dim = usize::try_from(list_size).map_err(|_| {
            IngestError::Database(format!("Invalid vector dimension {list_size}"))
        })?;

        let len = records.len();
        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut document_uris = Vec::with_capacity(len);
        let mut fingerprints = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut source_urls = Vec::with_capacity(len);
        let mut document_metadata = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            if record.vector.len() != vector_dim {
                return Err(IngestError::SchemaMismatch {
                    expected: format!("dimension {vector_dim}"),
                    found: format!("dimension {} for vector {}", record.vector.len(), record.id),
                });
            }

            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            document_uris.push(record.metadata.document_uri.as_str());
            fingerprints.push(record.metadata.content_fingerprint.as_str());
            chunk_indices.push(record.metadata.chunk_index);
            contents.push(record.metadata.content.as_str());
            source_urls.push(record.metadata.source_url.as_deref());
            document_metadata.push(record.metadata.document_metadata.as_deref());
            created_ats.push(record.metadata.created_at.as_str());
        }

        let values_array = Float32Array::from(flat_values);
        let vector_array =
            FixedSizeListArray::try_new(item_field, list_size, Arc::new(values_array), None)
                .map_err(|e| {
                    IngestError::Database(format!("Failed to create vector array: {e}"))
                })?;

        let arrays: Vec<Arc<dyn arrow::array::Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(document_uris)),
            Arc::new(StringArray::from(fingerprints)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(source_urls)),
            Arc::new(StringArray::from(document_metadata)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| IngestError::Database(format!("Failed to create record batch: {e}")))
    }

    /// Get the total number of embeddings stored
    #[inline]
    pub async fn count_embeddings(&self) -> Result<u64> {
        if !self.table_exists().await? {
            return Ok(0);
        }
        let table = self.open_table().await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| IngestError::Database(format!("Failed to count rows: {e}")))?;

        Ok(count as u64)
    }

    /// Number of embeddings stored for one document
    #[inline]
    pub async fn count_document_vectors(&self, document_uri: &str) -> Result<u64> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(Some(Self::document_predicate(document_uri)))
            .await
            .map_err(|e| IngestError::Database(format!("Failed to count rows: {e}")))?;

        Ok(count as u64)
    }

    /// Drop the embeddings table if it exists
    #[inline]
    pub async fn drop_table_if_exists(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.drop_table_unlocked().await
    }

    async fn drop_table_unlocked(&self) -> Result<()> {
        if self.table_exists().await? {
            info!("Dropping vector table {}", self.table_name);
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| IngestError::Database(format!("Failed to drop table: {e}")))?;
        }

        Ok(())
    }
}
