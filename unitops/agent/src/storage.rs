//! Object storage collaborator of the [`CommandExecutor`](crate::CommandExecutor).
//!
//! Objects are addressed by `bucket` + `key`. The stream based calls hand out live
//! readers and writers, so callers can move arbitrarily large objects with a fixed amount
//! of memory.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, buffered::BufWriter, local::LocalFileSystem, path::Path as ObjectPath,
    ObjectStore,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

/// Size of the parts uploaded by [`ObjectStorage::put_object`] writers, also the most
/// memory a single upload holds. 5 MiB is the smallest part S3 accepts.
pub const UPLOAD_PART_SIZE: usize = 5 * 1024 * 1024;

pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writer returned by [`ObjectStorage::put_object`]. The object is only complete once
/// [`AsyncWriteExt::shutdown`] returned successfully; dropping the writer earlier abandons
/// the upload.
pub type ObjectWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectWriter>;

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader>;

    /// Uploads the file at `path`, returns the number of bytes written.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let io_error = |source| StorageError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let mut writer = self.put_object(bucket, key).await?;
        let written = tokio::io::copy(&mut file, &mut writer)
            .await
            .map_err(io_error)?;
        writer.shutdown().await.map_err(io_error)?;

        Ok(written)
    }

    /// Downloads an object into the file at `path`, returns the number of bytes read.
    async fn get_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let io_error = |source| StorageError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut reader = self.get_object(bucket, key).await?;
        let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
        let read = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(io_error)?;
        file.flush().await.map_err(io_error)?;

        Ok(read)
    }
}

/// Where [`ObjectStoreStorage`] keeps its buckets.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StorageConfig {
    /// Every bucket is a directory under `root`.
    #[serde(rename_all = "camelCase")]
    Local { root: PathBuf },

    /// S3 or an S3 compatible service such as MinIO.
    #[serde(rename_all = "camelCase")]
    S3 {
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
        #[serde(default)]
        allow_http: bool,
    },
}

/// [`ObjectStorage`] on top of the [`object_store`] backends.
#[derive(Clone, Debug)]
pub struct ObjectStoreStorage {
    config: StorageConfig,
}

impl ObjectStoreStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    async fn store(&self, bucket: &str) -> StorageResult<Arc<dyn ObjectStore>> {
        if bucket.is_empty() || bucket.contains('/') {
            return Err(StorageError::Config(format!(
                "invalid bucket name `{bucket}`"
            )));
        }

        let store: Arc<dyn ObjectStore> = match &self.config {
            StorageConfig::Local { root } => {
                let path = root.join(bucket);
                tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|source| StorageError::Io {
                        path: path.display().to_string(),
                        source,
                    })?;

                Arc::new(LocalFileSystem::new_with_prefix(&path)?)
            }
            StorageConfig::S3 {
                endpoint,
                region,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(*allow_http);

                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_virtual_hosted_style_request(false);
                }
                if let Some(access_key_id) = access_key_id {
                    builder = builder.with_access_key_id(access_key_id);
                }
                if let Some(secret_access_key) = secret_access_key {
                    builder = builder.with_secret_access_key(secret_access_key);
                }

                Arc::new(builder.build()?)
            }
        };

        Ok(store)
    }
}

fn object_path(key: &str) -> StorageResult<ObjectPath> {
    ObjectPath::parse(key).map_err(|source| StorageError::InvalidKey {
        key: key.to_owned(),
        source,
    })
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn put_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectWriter> {
        let store = self.store(bucket).await?;
        let path = object_path(key)?;

        Ok(Box::new(BufWriter::with_capacity(
            store,
            path,
            UPLOAD_PART_SIZE,
        )))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        let store = self.store(bucket).await?;
        let path = object_path(key)?;

        let result = store.get(&path).await?;
        debug!(size = result.meta.size, "object found");

        let stream = result.into_stream().map_err(io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    fn local(root: &Path) -> ObjectStoreStorage {
        ObjectStoreStorage::new(StorageConfig::Local {
            root: root.to_path_buf(),
        })
    }

    #[tokio::test]
    async fn object_streams_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let storage = local(root.path());

        let mut writer = storage.put_object("backups", "mysql/full.sql").await.unwrap();
        writer.write_all(b"CREATE TABLE t (id INT);\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = storage.get_object("backups", "mysql/full.sql").await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();

        assert_eq!(content, "CREATE TABLE t (id INT);\n");
        assert!(root.path().join("backups/mysql/full.sql").exists());
    }

    #[tokio::test]
    async fn files_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let storage = local(root.path());

        let source = work.path().join("source");
        let payload = vec![7u8; UPLOAD_PART_SIZE + 1024];
        tokio::fs::write(&source, &payload).await.unwrap();

        let written = storage.put_file("bucket", "blob", &source).await.unwrap();
        assert_eq!(written, payload.len() as u64);

        let target = work.path().join("target");
        let read = storage.get_file("bucket", "blob", &target).await.unwrap();
        assert_eq!(read, payload.len() as u64);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn missing_object_is_an_error() {
        let root = tempfile::tempdir().unwrap();

        let result = local(root.path()).get_object("bucket", "nothing-here").await;
        assert!(matches!(result, Err(StorageError::ObjectStore(_))));
    }

    #[tokio::test]
    async fn unfinished_upload_leaves_no_object() {
        let root = tempfile::tempdir().unwrap();
        let storage = local(root.path());

        let mut writer = storage.put_object("bucket", "partial").await.unwrap();
        writer.write_all(b"half of it").await.unwrap();
        drop(writer);

        assert!(storage.get_object("bucket", "partial").await.is_err());
    }

    #[test]
    fn config_from_json() {
        let config: StorageConfig = serde_json::from_str(
            r#"{"type":"s3","endpoint":"http://minio:9000","allowHttp":true}"#,
        )
        .unwrap();

        assert_eq!(
            config,
            StorageConfig::S3 {
                endpoint: Some("http://minio:9000".to_owned()),
                region: None,
                access_key_id: None,
                secret_access_key: None,
                allow_http: true,
            }
        );
    }
}
