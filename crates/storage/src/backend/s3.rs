//! Package blobs in an S3-compatible bucket (AWS, MinIO, Backblaze B2, R2).
//!
//! Access keys come from the configuration file; the SDK's ambient
//! credential chain is not consulted.

use crate::backend::{ByteReader, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::{FileInfo, StorageBackend, validate_path};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use exn::{Exn, OptionExt, ResultExt};
use futures::io::AsyncReadExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::debug;

/// Requests in flight at once, across every clone of a backend.
const MAX_IN_FLIGHT: usize = 32;
/// One attempt plus three retries with exponential backoff.
const MAX_ATTEMPTS: u32 = 4;

/// Maps storage paths to object keys under an optional key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
struct KeySpace {
    prefix: Option<String>,
}
impl KeySpace {
    fn new(prefix: Option<&str>) -> Result<Self> {
        let prefix = match prefix.map(str::trim).filter(|prefix| !prefix.trim_matches('/').is_empty()) {
            Some(prefix) => Some(Self::utf8(validate_path(prefix)?)?),
            None => None,
        };
        Ok(Self { prefix })
    }

    fn utf8(path: PathBuf) -> Result<String> {
        let key = path.to_str().map(|key| key.replace('\\', "/"));
        key.ok_or_raise(|| ErrorKind::InvalidPath(path))
    }

    /// `requests/0f6f1b5f` becomes `{prefix}/requests/0f6f1b5f`.
    fn key(&self, path: &Path) -> Result<String> {
        let relative = Self::utf8(validate_path(path)?)?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{relative}"),
            None => relative,
        })
    }

    /// The storage path of an object key listed from the bucket.
    fn path(&self, key: &str) -> Result<PathBuf> {
        let relative = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str()).and_then(|rest| rest.strip_prefix('/')),
            None => Some(key),
        };
        let relative = relative.ok_or_raise(|| ErrorKind::InvalidPath(PathBuf::from(key)))?;
        validate_path(relative)
    }

    /// Key prefix selecting everything below `directory`, or the whole space.
    fn listing(&self, directory: Option<&Path>) -> Result<Option<String>> {
        Ok(match (directory, &self.prefix) {
            (Some(directory), _) => Some(format!("{}/", self.key(directory)?)),
            (None, Some(prefix)) => Some(format!("{prefix}/")),
            (None, None) => None,
        })
    }
}

fn timestamp(value: Option<&DateTime>) -> Result<OffsetDateTime> {
    let Some(value) = value else {
        return Ok(OffsetDateTime::UNIX_EPOCH);
    };
    OffsetDateTime::from_unix_timestamp_nanos(value.as_nanos())
        .or_raise(|| ErrorKind::BackendError(format!("object timestamp {}s out of range", value.secs())))
}

fn size(value: Option<i64>) -> u64 {
    value.and_then(|size| u64::try_from(size).ok()).unwrap_or_default()
}

/// Blob storage in an S3 bucket.
///
/// ```no_run
/// use wheelhouse_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "s3",
///     "wheelhouse",
///     Some("simple".to_string()),
///     "us-east-1",
///     Some("http://localhost:9000"),
///     "minioadmin",
///     "minioadmin",
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    keys: KeySpace,
    permits: Arc<Semaphore>,
}

impl S3Backend {
    /// Builds a client for `bucket`. `endpoint` points the client at a
    /// non-AWS service, addressed path-style.
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let keys = KeySpace::new(prefix.as_deref())?;
        let mut config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.into()))
            .credentials_provider(Credentials::new(key_id, key_secret, None, None, "wheelhouse"))
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS));
        if let Some(endpoint) = endpoint {
            config = config.endpoint_url(endpoint).force_path_style(true);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config.build()),
            bucket: bucket.into(),
            keys,
            permits: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        })
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("s3 request limiter closed".to_string()))
    }

    fn network(&self, operation: &str, key: &str) -> ErrorKind {
        ErrorKind::Network(format!("{operation} s3://{}/{key}", self.bucket))
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, prefix: Option<&'a Path>) -> FileInfoStream<'a> {
        let listing = match self.keys.listing(prefix) {
            Ok(listing) => listing,
            Err(err) => return Box::pin(futures::stream::once(async move { Err(err) })),
        };
        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_prefix(listing.clone())
                .into_paginator()
                .send();
            while let Some(page) = pages.next().await {
                let page = match page {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(Exn::from(err).raise(self.network("ListObjectsV2", listing.as_deref().unwrap_or("/"))));
                        break;
                    },
                };
                for object in page.contents() {
                    // Keys ending in `/` are console-created folder markers.
                    let Some(key) = object.key().filter(|key| !key.ends_with('/')) else {
                        continue;
                    };
                    yield self.keys.path(key).and_then(|path| {
                        Ok(FileInfo::new(path, size(object.size()), timestamp(object.last_modified())?))
                    });
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn reader(&self, path: &Path) -> Result<ByteReader> {
        let key = self.keys.key(path)?;
        let _permit = self.permit().await?;
        let object = self.client.get_object().bucket(&self.bucket).key(&key).send().await;
        let object = match object {
            Err(err) if err.as_service_error().is_some_and(GetObjectError::is_no_such_key) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            result => result.or_raise(|| self.network("GetObject", &key))?,
        };
        Ok(Box::pin(object.body.into_async_read().compat()))
    }

    /// Artifacts are small enough to upload in one `PutObject`, so the body
    /// is buffered first. A reader that fails leaves nothing in the bucket.
    async fn write_stream(&self, path: &Path, mut content: ByteReader) -> Result<u64> {
        let key = self.keys.key(path)?;
        let mut body = Vec::new();
        content
            .read_to_end(&mut body)
            .await
            .or_raise(|| ErrorKind::BackendError(format!("upload to {key} was interrupted")))?;
        let written = body.len() as u64;
        let _permit = self.permit().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .or_raise(|| self.network("PutObject", &key))?;
        debug!(backend = %self.name, key = %key, bytes = written, "object written");
        Ok(written)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        // DeleteObject reports success for absent keys.
        self.stat(path).await?;
        let key = self.keys.key(path)?;
        let _permit = self.permit().await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .or_raise(|| self.network("DeleteObject", &key))?;
        debug!(backend = %self.name, key = %key, "object deleted");
        Ok(())
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let key = self.keys.key(path)?;
        let _permit = self.permit().await?;
        let head = self.client.head_object().bucket(&self.bucket).key(&key).send().await;
        let head = match head {
            Err(err) if err.as_service_error().is_some_and(HeadObjectError::is_not_found) => {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()))
            },
            result => result.or_raise(|| self.network("HeadObject", &key))?,
        };
        Ok(FileInfo::new(validate_path(path)?, size(head.content_length()), timestamp(head.last_modified())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, None)]
    #[case(Some(""), None)]
    #[case(Some("/"), None)]
    #[case(Some("simple"), Some("simple"))]
    #[case(Some("/mirror/simple/"), Some("mirror/simple"))]
    fn test_prefix_is_normalized(#[case] prefix: Option<&str>, #[case] expected: Option<&str>) {
        assert_eq!(KeySpace::new(prefix).unwrap().prefix.as_deref(), expected);
    }

    #[test]
    fn test_prefix_cannot_climb() {
        assert!(KeySpace::new(Some("../other-tenant")).is_err());
    }

    #[rstest]
    #[case(None, "requests/0f6f1b5f", "requests/0f6f1b5f")]
    #[case(Some("simple"), "requests/0f6f1b5f", "simple/requests/0f6f1b5f")]
    #[case(Some("mirror/simple"), "./requests//0f6f1b5f", "mirror/simple/requests/0f6f1b5f")]
    fn test_keys_round_trip(#[case] prefix: Option<&str>, #[case] path: &str, #[case] key: &str) {
        let keys = KeySpace::new(prefix).unwrap();
        assert_eq!(keys.key(Path::new(path)).unwrap(), key);
        assert_eq!(keys.path(key).unwrap(), Path::new("requests/0f6f1b5f"));
    }

    #[test]
    fn test_foreign_keys_are_rejected() {
        let keys = KeySpace::new(Some("simple")).unwrap();
        assert!(keys.key(Path::new("../escape")).is_err());
        assert!(keys.path("simpler/requests/0f6f1b5f").is_err());
        assert!(keys.path("other/requests/0f6f1b5f").is_err());
    }

    #[rstest]
    #[case(None, None, None)]
    #[case(Some("simple"), None, Some("simple/"))]
    #[case(None, Some("requests"), Some("requests/"))]
    #[case(Some("simple"), Some("requests"), Some("simple/requests/"))]
    fn test_listing_prefix(#[case] prefix: Option<&str>, #[case] directory: Option<&str>, #[case] expected: Option<&str>) {
        let keys = KeySpace::new(prefix).unwrap();
        assert_eq!(keys.listing(directory.map(Path::new)).unwrap().as_deref(), expected);
    }

    #[rstest]
    #[case(None, 0)]
    #[case(Some(-1), 0)]
    #[case(Some(4096), 4096)]
    fn test_size(#[case] reported: Option<i64>, #[case] expected: u64) {
        assert_eq!(size(reported), expected);
    }

    #[test]
    fn test_missing_timestamp_is_epoch() {
        assert_eq!(timestamp(None).unwrap(), OffsetDateTime::UNIX_EPOCH);
        let at = DateTime::from_secs(1_700_000_000);
        assert_eq!(timestamp(Some(&at)).unwrap().unix_timestamp(), 1_700_000_000);
    }
}
