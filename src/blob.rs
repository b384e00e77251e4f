//! Blob store boundary
//!
//! Prompt datasets are handed to the provider through the blob store, and
//! job artifacts are read back from it. Locations are `scheme://bucket/key`
//! URIs; keys are flat strings and "directories" are only key prefixes.

use crate::error::{EvalError, EvalResult};
use async_trait::async_trait;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// A `scheme://bucket/key` location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobLocation {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl BlobLocation {
    pub fn parse(uri: &str) -> EvalResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| EvalError::InvalidBlobLocation(uri.to_string()))?;

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if scheme.is_empty() || bucket.is_empty() {
            return Err(EvalError::InvalidBlobLocation(uri.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Append `path` to this location's key, inserting a separator if needed
    pub fn child(&self, path: &str) -> Self {
        let key = if self.key.is_empty() || self.key.ends_with('/') {
            format!("{}{}", self.key, path)
        } else {
            format!("{}/{}", self.key, path)
        };

        Self {
            key,
            ..self.clone()
        }
    }

    /// Last `/`-separated component of the key
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

/// Object storage used for datasets and result artifacts
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_object(&self, location: &BlobLocation, bytes: Vec<u8>) -> EvalResult<()>;

    /// Locations of all objects whose key starts with `prefix.key`, sorted
    async fn list_objects(&self, prefix: &BlobLocation) -> EvalResult<Vec<BlobLocation>>;

    async fn get_object(&self, location: &BlobLocation) -> EvalResult<Vec<u8>>;
}

/// Blob store rooted in a local directory: `{root}/{bucket}/{key}`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, location: &BlobLocation) -> EvalResult<PathBuf> {
        check_relative(location, Path::new(&location.bucket))?;
        Ok(self.root.join(&location.bucket))
    }

    fn object_path(&self, location: &BlobLocation) -> EvalResult<PathBuf> {
        let key = Path::new(&location.key);
        check_relative(location, key)?;
        Ok(self.bucket_dir(location)?.join(key))
    }
}

/// Reject bucket or key text that would escape the store root
fn check_relative(location: &BlobLocation, path: &Path) -> EvalResult<()> {
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        Ok(())
    } else {
        Err(EvalError::InvalidBlobLocation(location.to_string()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put_object(&self, location: &BlobLocation, bytes: Vec<u8>) -> EvalResult<()> {
        let path = self.object_path(location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EvalError::provider("put_object", e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| EvalError::provider("put_object", format!("{}: {}", location, e)))
    }

    async fn list_objects(&self, prefix: &BlobLocation) -> EvalResult<Vec<BlobLocation>> {
        let bucket_dir = self.bucket_dir(prefix)?;
        if !bucket_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&bucket_dir) {
            let entry = entry.map_err(|e| EvalError::provider("list_objects", e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&bucket_dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if key.starts_with(&prefix.key) {
                objects.push(BlobLocation {
                    key,
                    ..prefix.clone()
                });
            }
        }

        objects.sort();
        Ok(objects)
    }

    async fn get_object(&self, location: &BlobLocation) -> EvalResult<Vec<u8>> {
        let path = self.object_path(location)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| EvalError::provider("get_object", format!("{}: {}", location, e)))
    }
}
