use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Object storage holding source videos and output archives.
///
/// Objects move between the store and local files without being held
/// whole in memory.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stream the file at `path` to `key`, returning the object's retrievable address.
    async fn upload_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String, StorageError>;

    /// Stream the object stored under `key` into a new file at `path`.
    async fn download_to(&self, key: &str, path: &Path) -> Result<(), StorageError>;

    /// Remove the object stored under `key`.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Resolve an address (as found in a job's `video_url`) to an object key.
    fn object_key(&self, address: &str) -> Result<String, StorageError>;
}

/// Client for an S3-compatible bucket (MinIO, R2, S3).
pub struct S3Store {
    bucket: Box<Bucket>,
    endpoint: String,
}

impl S3Store {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn address_of(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket.name(), key)
    }
}

fn check_status(key: &str, status: u16) -> Result<(), StorageError> {
    if (200..300).contains(&status) {
        Ok(())
    } else if status == 404 {
        Err(StorageError::NotFound(key.to_string()))
    } else {
        Err(StorageError::Status {
            key: key.to_string(),
            status,
        })
    }
}

fn request_error(key: &str, error: S3Error) -> StorageError {
    match error {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(key.to_string()),
        other => StorageError::S3(other),
    }
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn upload_file(&self, key: &str, path: &Path, content_type: &str) -> Result<String, StorageError> {
        let mut file = tokio::fs::File::open(path).await?;
        let response = self
            .bucket
            .put_object_stream_with_content_type(&mut file, key, content_type)
            .await
            .map_err(|e| request_error(key, e))?;
        check_status(key, response.status_code())?;
        Ok(self.address_of(key))
    }

    async fn download_to(&self, key: &str, path: &Path) -> Result<(), StorageError> {
        let mut file = tokio::fs::File::create(path).await?;
        let status = self
            .bucket
            .get_object_to_writer(key, &mut file)
            .await
            .map_err(|e| request_error(key, e))?;
        check_status(key, status)?;
        file.flush().await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .delete_object(key)
            .await
            .map_err(|e| request_error(key, e))?;
        check_status(key, response.status_code())?;
        Ok(())
    }

    fn object_key(&self, address: &str) -> Result<String, StorageError> {
        resolve_object_key(address, &self.bucket.name())
    }
}

/// Resolve a source address to an object key.
///
/// Accepts `store://<key>`, `http(s)://host/<bucket>/<key>` and bare keys.
pub fn resolve_object_key(address: &str, bucket: &str) -> Result<String, StorageError> {
    let address = address.trim();

    let raw_key = match url::Url::parse(address) {
        Ok(parsed) if parsed.scheme() == "store" => {
            let host = parsed.host_str().unwrap_or_default();
            format!("{}{}", host, parsed.path())
        }
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
            let path = parsed.path().trim_start_matches('/');
            match path.split_once('/') {
                Some((first, rest)) if first == bucket => rest.to_string(),
                _ => path.to_string(),
            }
        }
        Ok(parsed) => {
            return Err(StorageError::InvalidAddress(format!(
                "unsupported scheme '{}' in {}",
                parsed.scheme(),
                address
            )))
        }
        Err(_) => address.to_string(),
    };

    let key = urlencoding::decode(raw_key.trim_matches('/'))
        .map_err(|e| StorageError::InvalidAddress(format!("{}: {}", address, e)))?
        .into_owned();

    if key.is_empty() {
        return Err(StorageError::InvalidAddress(address.to_string()));
    }
    Ok(key)
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage returned status {status} for {key}")]
    Status { key: String, status: u16 },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact address: {0}")]
    InvalidAddress(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),
}
