use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::models::pipeline::ProductType;
use crate::services::collaborators::{CollaboratorError, CreatedProduct, PlatformAdapter, ProductListing};

/// Connection settings for one storefront.
#[derive(Debug, Clone, PartialEq)]
pub struct StorefrontSettings {
    pub name: String,
    pub base_url: String,
    pub api_token: String,
    /// Product types the storefront lists; `None` means all of them.
    pub product_types: Option<Vec<ProductType>>,
}

impl StorefrontSettings {
    /// Parse `name=base_url` entries; an entry is kept only when `<NAME>_API_TOKEN`
    /// resolves through `lookup`. `<NAME>_PRODUCT_TYPES` optionally restricts the
    /// product types, as a comma-separated list.
    pub fn from_entries<F>(entries: &[String], lookup: F) -> Vec<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        entries
            .iter()
            .filter_map(|entry| {
                let (name, base_url) = entry.split_once('=')?;
                let name = name.trim().to_lowercase();
                let prefix = name.to_uppercase().replace('-', "_");
                let key = format!("{prefix}_API_TOKEN");
                let Some(api_token) = lookup(&key) else {
                    tracing::warn!(platform = %name, env = %key, "Storefront skipped: no credentials");
                    return None;
                };
                let product_types = lookup(&format!("{prefix}_PRODUCT_TYPES"))
                    .map(|list| parse_product_types(&name, &list));
                Some(Self {
                    name,
                    base_url: base_url.trim().trim_end_matches('/').to_string(),
                    api_token,
                    product_types,
                })
            })
            .collect()
    }
}

fn parse_product_types(platform: &str, list: &str) -> Vec<ProductType> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| match item.parse() {
            Ok(product_type) => Some(product_type),
            Err(_) => {
                tracing::warn!(platform, product_type = item, "Ignoring unknown product type");
                None
            }
        })
        .collect()
}

/// Generic JSON storefront adapter.
pub struct StorefrontClient {
    http: Client,
    settings: StorefrontSettings,
}

#[derive(Deserialize)]
struct CreateProductResponse {
    id: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct PublishResponse {
    published: bool,
}

impl StorefrontClient {
    pub fn new(settings: StorefrontSettings) -> Result<Self, StorefrontError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(StorefrontError::Http)?;
        Ok(Self { http, settings })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StorefrontError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StorefrontError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PlatformAdapter for StorefrontClient {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn supports(&self, product_type: ProductType) -> bool {
        self.settings
            .product_types
            .as_ref()
            .map_or(true, |types| types.contains(&product_type))
    }

    fn supports_publish(&self) -> bool {
        true
    }

    async fn create_product(&self, listing: &ProductListing) -> Result<CreatedProduct, CollaboratorError> {
        let response = self
            .http
            .post(format!("{}/products", self.settings.base_url))
            .bearer_auth(&self.settings.api_token)
            .json(listing)
            .send()
            .await
            .map_err(StorefrontError::Http)?;
        let body: CreateProductResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(StorefrontError::Http)?;

        Ok(CreatedProduct {
            platform_product_id: body.id,
            product_url: body.url,
        })
    }

    async fn publish(&self, platform_product_id: &str) -> Result<bool, CollaboratorError> {
        let response = self
            .http
            .post(format!(
                "{}/products/{}/publish",
                self.settings.base_url, platform_product_id
            ))
            .bearer_auth(&self.settings.api_token)
            .send()
            .await
            .map_err(StorefrontError::Http)?;
        let body: PublishResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(StorefrontError::Http)?;
        Ok(body.published)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorefrontError {
    #[error("Storefront request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Storefront returned {status}: {message}")]
    Api { status: u16, message: String },
}
