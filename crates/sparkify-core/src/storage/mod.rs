//! Storage abstraction over S3 and the local filesystem.
//!
//! A [`StorageProvider`] is rooted at one URL; every path it accepts or
//! returns is relative to that root.

mod local;
mod pattern;
mod s3;
mod url_parser;

pub use local::LocalConfig;
pub use pattern::PathPattern;
pub use s3::S3Config;
pub use url_parser::{BackendConfig, join_url};

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use snafu::prelude::*;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ObjectStoreSnafu, StorageError};

/// Storage provider that abstracts over the supported backends.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    /// Create a storage provider for reading the given URL.
    ///
    /// Options are only used by remote backends (credentials, region, endpoint).
    /// Nothing is created; a missing local root is a not-found error.
    pub async fn for_url_with_options(
        url: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::open(url, options, false).await
    }

    /// Create a storage provider for writing, creating a local root if needed.
    pub async fn for_output_url_with_options(
        url: &str,
        options: &HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        Self::open(url, options, true).await
    }

    async fn open(
        url: &str,
        options: &HashMap<String, String>,
        create: bool,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::S3(config) => Self::construct_s3(config, options),
            BackendConfig::Local(config) => Self::construct_local(config, create).await,
        }
    }

    /// The normalized URL of this provider's root.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a path with the configured key prefix.
    pub fn qualify_path<'a>(&self, path: &'a Path) -> Cow<'a, Path> {
        match self.config.key() {
            Some(prefix) => Cow::Owned(prefix.parts().chain(path.parts()).collect()),
            None => Cow::Borrowed(path),
        }
    }

    /// List every file below the root, recursively.
    ///
    /// Returns paths relative to the root, sorted for deterministic ordering.
    pub async fn list_files(&self) -> Result<Vec<Path>, StorageError> {
        let key_part_count = self
            .config
            .key()
            .map(|key| key.parts().count())
            .unwrap_or_default();

        let listed: Vec<_> = self
            .object_store
            .list(self.config.key())
            .try_collect()
            .await
            .context(ObjectStoreSnafu)?;

        let mut files: Vec<Path> = listed
            .into_iter()
            .map(|meta| meta.location.parts().skip(key_part_count).collect())
            .collect();
        files.sort();

        debug!(root = %self.canonical_url, files = files.len(), "Listed files");
        Ok(files)
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let path = self.qualify_path(path);
        self.object_store
            .get(&path)
            .await
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)
    }

    /// Put bytes to a path.
    pub async fn put(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        self.put_with_opts(path, PutPayload::from(bytes), PutOptions::default())
            .await
    }

    /// Put a Parquet file to a path with the correct content type.
    ///
    /// Local filesystem doesn't support attributes, so they are skipped there.
    pub async fn put_parquet(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        if matches!(self.config, BackendConfig::Local(_)) {
            return self.put(path, bytes).await;
        }

        let opts = PutOptions {
            attributes: Attributes::from_iter([(
                Attribute::ContentType,
                AttributeValue::from("application/vnd.apache.parquet"),
            )]),
            ..Default::default()
        };
        self.put_with_opts(path, PutPayload::from(bytes), opts)
            .await
    }

    async fn put_with_opts(
        &self,
        path: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<(), StorageError> {
        let path = self.qualify_path(path);
        self.object_store
            .put_opts(&path, payload, opts)
            .await
            .context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete every file below the root. Returns the number of files removed.
    ///
    /// Deletes go through the store's bulk path (batched requests on S3).
    pub async fn delete_all(&self) -> Result<usize, StorageError> {
        let locations: Vec<Path> = self
            .object_store
            .list(self.config.key())
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .context(ObjectStoreSnafu)?;
        if locations.is_empty() {
            return Ok(0);
        }

        let deleted: Vec<Path> = self
            .object_store
            .delete_stream(stream::iter(locations.into_iter().map(Ok)).boxed())
            .try_collect()
            .await
            .context(ObjectStoreSnafu)?;

        debug!(root = %self.canonical_url, files = deleted.len(), "Deleted existing files");
        Ok(deleted.len())
    }
}
