//! Object store access for uploaded documents and run-scoped artifacts


use std::path::Path;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutPayload, path::Path as ObjPath};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{IngestError, Result};

pub type DynStore = Arc<dyn ObjectStore>;

/// Location of the manifest written for `run_id`
#[inline]
pub fn manifest_location(run_id: &str) -> String {
    format!("ingestion_input/{run_id}/manifest.jsonl")
}

/// Location of the result records written for `run_id`
#[inline]
pub fn results_location(run_id: &str) -> String {
    format!("ingestion_output/{run_id}/results.jsonl")
}

/// Metadata of one stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub location: String,
    pub size: u64,
    pub e_tag: Option<String>,
    pub version: Option<String>,
    pub last_modified: DateTime<Utc>,
}

impl From<ObjectMeta> for ObjectInfo {
    #[inline]
    fn from(meta: ObjectMeta) -> Self {
        Self {
            location: meta.location.to_string(),
            size: meta.size as u64,
            e_tag: meta.e_tag,
            version: meta.version,
            last_modified: meta.last_modified,
        }
    }
}

/// Thin wrapper over an `ObjectStore` backend
#[derive(Clone)]
pub struct ObjectStorage {
    store: DynStore,
}

impl std::fmt::Debug for ObjectStorage {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("store", &self.store.to_string())
            .finish()
    }
}

impl ObjectStorage {
    /// Filesystem-backed store rooted at `root`, created if missing
    #[inline]
    pub fn local(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
            IngestError::Storage(format!(
                "Failed to open object store at {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self::with_backend(Arc::new(store)))
    }

    #[inline]
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(InMemory::new()))
    }

    #[inline]
    pub fn with_backend(store: DynStore) -> Self {
        Self { store }
    }

    /// Object metadata, `None` if nothing is stored at `location`
    #[inline]
    pub async fn head(&self, location: &str) -> Result<Option<ObjectInfo>> {
        match self.store.head(&ObjPath::from(location)).await {
            Ok(meta) => Ok(Some(meta.into())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(IngestError::Storage(format!(
                "Failed to read metadata of {location}: {e}"
            ))),
        }
    }

    /// Full contents of the object at `location`
    #[inline]
    pub async fn read(&self, location: &str) -> Result<Bytes> {
        self.read_optional(location)
            .await?
            .ok_or_else(|| IngestError::Storage(format!("Object not found: {location}")))
    }

    #[inline]
    pub async fn read_optional(&self, location: &str) -> Result<Option<Bytes>> {
        let result = match self.store.get(&ObjPath::from(location)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(IngestError::Storage(format!(
                    "Failed to read {location}: {e}"
                )));
            }
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| IngestError::Storage(format!("Failed to read {location}: {e}")))?;
        Ok(Some(bytes))
    }

    #[inline]
    pub async fn put(&self, location: &str, data: Bytes) -> Result<()> {
        self.put_with_mode(location, data, PutMode::Overwrite).await
    }

    /// Write `data` only if nothing is stored at `location` yet
    #[inline]
    pub async fn put_new(&self, location: &str, data: Bytes) -> Result<()> {
        self.put_with_mode(location, data, PutMode::Create).await
    }

    async fn put_with_mode(&self, location: &str, data: Bytes, mode: PutMode) -> Result<()> {
        match self
            .store
            .put_opts(&ObjPath::from(location), PutPayload::from_bytes(data), mode.into())
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => {
                Err(IngestError::ArtifactExists(location.to_string()))
            }
            Err(e) => Err(IngestError::Storage(format!("Failed to write {location}: {e}"))),
        }
    }

    /// Write `records` as one JSON document per line
    #[inline]
    pub async fn put_json_lines<T: Serialize>(&self, location: &str, records: &[T]) -> Result<()> {
        let data = encode_json_lines(location, records)?;
        self.put(location, data).await?;
        debug!("Wrote {} records to {}", records.len(), location);
        Ok(())
    }

    /// Like `put_json_lines`, but fails with `ArtifactExists` instead of
    /// replacing an object already stored at `location`
    #[inline]
    pub async fn put_json_lines_new<T: Serialize>(
        &self,
        location: &str,
        records: &[T],
    ) -> Result<()> {
        let data = encode_json_lines(location, records)?;
        self.put_new(location, data).await?;
        debug!("Created {} with {} records", location, records.len());
        Ok(())
    }

    /// Read a JSON-lines object written by `put_json_lines`. Blank lines are skipped.
    #[inline]
    pub async fn read_json_lines<T: DeserializeOwned>(&self, location: &str) -> Result<Vec<T>> {
        let bytes = self.read(location).await?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| IngestError::Storage(format!("{location} is not valid UTF-8: {e}")))?;

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line).map_err(|e| {
                    IngestError::Storage(format!(
                        "Invalid record on line {} of {location}: {e}",
                        number + 1
                    ))
                })
            })
            .collect()
    }

    /// Every object below `prefix` (or in the whole store)
    #[inline]
    pub async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let prefix_path = prefix.map(ObjPath::from);
        let objects: Vec<ObjectMeta> = self
            .store
            .list(prefix_path.as_ref())
            .try_collect()
            .await
            .map_err(|e| IngestError::Storage(format!("Failed to list objects: {e}")))?;

        let mut objects: Vec<ObjectInfo> = objects.into_iter().map(ObjectInfo::from).collect();
        objects.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(objects)
    }
}

fn encode_json_lines<T: Serialize>(location: &str, records: &[T]) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    for record in records {
        let line = serde_json::to_vec(record).map_err(|e| {
            IngestError::Storage(format!("Failed to serialize record for {location}: {e}"))
        })?;
        buffer.put_slice(&line);
        buffer.put_u8(b'\n');
    }
    Ok(buffer.freeze())
}
