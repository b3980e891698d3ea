//! Narrow interfaces to the external systems a pipeline run talks to.
//!
//! The orchestrator only sees these traits; concrete HTTP/R2 clients live in
//! sibling modules and tests substitute in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::pipeline::ProductType;
use crate::services::image_gen::ImageApiError;
use crate::services::prompts::PromptApiError;
use crate::services::storage::StorageError;
use crate::services::storefront::StorefrontError;

/// Inputs for the prompt-generation backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptQuery {
    pub theme: Option<String>,
    pub style: Option<String>,
    pub niche: Option<String>,
    pub count: u32,
}

/// One design idea returned by the prompt backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptIdea {
    #[serde(alias = "prompt")]
    pub prompt_text: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Completed,
    Failed,
}

/// Image backend response for a single prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub image_urls: Vec<String>,
    pub status: GenerationStatus,
    pub error: Option<String>,
}

/// Where the asset store should read image content from.
#[derive(Debug, Clone)]
pub enum ImageData {
    /// `http(s)://` URL to fetch, or a `data:` URI.
    Url(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetMetadata {
    pub title: String,
    pub prompt: String,
    pub tags: Vec<String>,
}

/// Identical content always maps to the same record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredAsset {
    pub id: String,
    pub url: String,
    pub content_hash: String,
}

/// Product details sent to a storefront.
#[derive(Debug, Clone, Serialize)]
pub struct ProductListing {
    pub asset_url: String,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub tags: Vec<String>,
    pub product_type: ProductType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatedProduct {
    pub platform_product_id: String,
    pub product_url: Option<String>,
}

#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn generate_prompts(&self, query: &PromptQuery) -> Result<Vec<PromptIdea>, CollaboratorError>;
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn generate_image(
        &self,
        prompt_text: &str,
        width: u32,
        height: u32,
        steps: u32,
    ) -> Result<GeneratedImage, CollaboratorError>;
}

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn save_image(
        &self,
        source: ImageData,
        metadata: &AssetMetadata,
    ) -> Result<StoredAsset, CollaboratorError>;
}

/// One storefront. Each registered adapter gets its own circuit breaker.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Capability tag: product types this storefront can list.
    fn supports(&self, _product_type: ProductType) -> bool {
        true
    }

    fn supports_publish(&self) -> bool {
        false
    }

    async fn create_product(&self, listing: &ProductListing) -> Result<CreatedProduct, CollaboratorError>;

    async fn publish(&self, _platform_product_id: &str) -> Result<bool, CollaboratorError> {
        Ok(false)
    }
}

/// Storefront adapters available to the orchestrator, keyed by name.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    adapters: BTreeMap<String, Arc<dyn PlatformAdapter>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        let name = adapter.name().to_string();
        if self.adapters.insert(name.clone(), adapter).is_some() {
            tracing::warn!(platform = %name, "Replacing previously registered storefront adapter");
        }
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PlatformAdapter>> {
        self.adapters.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Image(#[from] ImageApiError),

    #[error(transparent)]
    Prompt(#[from] PromptApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Storefront(#[from] StorefrontError),

    #[error("{0}")]
    Other(String),
}
