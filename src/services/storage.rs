use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::services::collaborators::{AssetMetadata, AssetStore, CollaboratorError, ImageData, StoredAsset};

/// Hex SHA-256 of image content; the identity used for deduplication.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Fetch `http(s)` sources, decode `data:` URIs, pass raw bytes through.
pub async fn resolve_image_bytes(http: &Client, source: ImageData) -> Result<Vec<u8>, StorageError> {
    match source {
        ImageData::Bytes(bytes) => Ok(bytes),
        ImageData::Url(url) if url.starts_with("data:") => {
            let (_, encoded) = url
                .split_once(',')
                .ok_or_else(|| StorageError::InvalidSource("malformed data URI".to_string()))?;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| StorageError::InvalidSource(e.to_string()))
        }
        ImageData::Url(url) => {
            let response = http
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(StorageError::Fetch)?;
            let bytes = response.bytes().await.map_err(StorageError::Fetch)?;
            Ok(bytes.to_vec())
        }
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
///
/// Objects are keyed by content hash, so identical bytes always land on the
/// same key and return the same asset id.
pub struct R2Client {
    bucket: Box<Bucket>,
    public_url: String,
    http: Client,
    stored: Mutex<HashMap<String, StoredAsset>>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        public_url: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_url: public_url.trim_end_matches('/').to_string(),
            http: Client::new(),
            stored: Mutex::new(HashMap::new()),
        })
    }

    /// Upload image bytes to R2.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }

    fn cached(&self, hash: &str) -> Option<StoredAsset> {
        self.stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(hash)
            .cloned()
    }
}

#[async_trait]
impl AssetStore for R2Client {
    async fn save_image(
        &self,
        source: ImageData,
        metadata: &AssetMetadata,
    ) -> Result<StoredAsset, CollaboratorError> {
        let bytes = resolve_image_bytes(&self.http, source).await?;
        let hash = content_hash(&bytes);

        if let Some(existing) = self.cached(&hash) {
            tracing::debug!(asset_id = %existing.id, "Duplicate image content, reusing stored asset");
            return Ok(existing);
        }

        let format = image::guess_format(&bytes).map_err(|_| StorageError::UnsupportedFormat)?;
        let extension = format.extensions_str().first().copied().unwrap_or("bin");
        let key = format!("designs/{hash}.{extension}");

        self.upload(&key, &bytes, format.to_mime_type()).await?;

        let asset = StoredAsset {
            id: hash.clone(),
            url: format!("{}/{}", self.public_url, key),
            content_hash: hash.clone(),
        };
        tracing::info!(asset_id = %asset.id, title = %metadata.title, size = bytes.len(), "Design stored in R2");

        self.stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(hash, asset.clone());
        Ok(asset)
    }
}

/// Process-local asset store used when no object storage is configured.
pub struct MemoryAssetStore {
    http: Client,
    assets: Mutex<HashMap<String, (StoredAsset, Vec<u8>)>>,
}

impl Default for MemoryAssetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            assets: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.assets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn save_image(
        &self,
        source: ImageData,
        _metadata: &AssetMetadata,
    ) -> Result<StoredAsset, CollaboratorError> {
        let bytes = resolve_image_bytes(&self.http, source).await?;
        let hash = content_hash(&bytes);

        let mut assets = self
            .assets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (asset, _) = assets.entry(hash.clone()).or_insert_with(|| {
            let asset = StoredAsset {
                id: hash.clone(),
                url: format!("memory://designs/{hash}"),
                content_hash: hash.clone(),
            };
            (asset, bytes)
        });
        Ok(asset.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Failed to fetch image: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Invalid image source: {0}")]
    InvalidSource(String),

    #[error("Unrecognized image format")]
    UnsupportedFormat,
}
