//! Asset storage seam.
//!
//! An upload is driven chunk by chunk through an [`AssetWriter`]; each
//! `write` is a point where the caller regains control and can report
//! progress or notice cancellation. Nothing is visible in storage until
//! `finish` returns the durable URL.

use async_trait::async_trait;
use bytes::Bytes;
use opendal::Operator;
use tracing::debug;

use crate::error::StorageError;

#[async_trait]
pub trait AssetStorage: Send + Sync {
    /// Start a new object at `path`
    async fn open_upload(&self, path: &str) -> Result<Box<dyn AssetWriter>, StorageError>;

    /// Remove a previously finished object by its durable URL
    async fn delete(&self, durable_url: &str) -> Result<(), StorageError>;
}

#[async_trait]
pub trait AssetWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError>;

    /// Commit the object and return its durable URL
    async fn finish(&mut self) -> Result<String, StorageError>;

    /// Drop everything written so far
    async fn abort(&mut self) -> Result<(), StorageError>;
}

/// [`AssetStorage`] over any OpenDAL backend.
///
/// Durable URLs are `{public_base_url}/{path}`.
#[derive(Clone)]
pub struct OpenDalAssetStorage {
    op: Operator,
    public_base_url: String,
}

impl OpenDalAssetStorage {
    pub fn new(op: Operator, public_base_url: impl Into<String>) -> Self {
        let public_base_url = public_base_url.into().trim_end_matches('/').to_string();
        Self { op, public_base_url }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    pub fn durable_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base_url, path.trim_start_matches('/'))
    }

    /// Inverse of [`durable_url`](Self::durable_url)
    pub fn path_of(&self, durable_url: &str) -> Result<String, StorageError> {
        durable_url
            .strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StorageError::ForeignUrl {
                url: durable_url.to_string(),
                base: self.public_base_url.clone(),
            })
    }
}

#[async_trait]
impl AssetStorage for OpenDalAssetStorage {
    async fn open_upload(&self, path: &str) -> Result<Box<dyn AssetWriter>, StorageError> {
        let writer = self.op.writer(path).await?;
        debug!(path, "opened asset writer");
        Ok(Box::new(OpenDalAssetWriter {
            writer,
            url: self.durable_url(path),
        }))
    }

    async fn delete(&self, durable_url: &str) -> Result<(), StorageError> {
        let path = self.path_of(durable_url)?;
        self.op.delete(&path).await?;
        debug!(path = %path, "deleted asset");
        Ok(())
    }
}

struct OpenDalAssetWriter {
    writer: opendal::Writer,
    url: String,
}

#[async_trait]
impl AssetWriter for OpenDalAssetWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.writer.write(chunk).await?;
        Ok(())
    }

    async fn finish(&mut self) -> Result<String, StorageError> {
        self.writer.close().await?;
        Ok(self.url.clone())
    }

    async fn abort(&mut self) -> Result<(), StorageError> {
        self.writer.abort().await?;
        Ok(())
    }
}
