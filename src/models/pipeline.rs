use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Product types that can be created from a generated design.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProductType {
    TShirt,
    Hoodie,
    Poster,
    Mug,
    Sticker,
    Canvas,
}

impl ProductType {
    /// Default retail price (USD) when the request carries no override.
    pub fn default_price(self) -> f64 {
        match self {
            ProductType::TShirt => 24.99,
            ProductType::Hoodie => 44.99,
            ProductType::Poster => 19.99,
            ProductType::Mug => 16.99,
            ProductType::Sticker => 4.99,
            ProductType::Canvas => 49.99,
        }
    }
}

/// One generate-then-publish request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct GenerationRequest {
    #[garde(length(max = 200))]
    #[serde(default)]
    pub theme: Option<String>,

    #[garde(length(max = 100))]
    #[serde(default)]
    pub style: Option<String>,

    #[garde(length(max = 100))]
    #[serde(default)]
    pub niche: Option<String>,

    /// Number of designs to generate.
    #[garde(range(min = 1, max = 50))]
    #[serde(default = "default_count")]
    pub count: u32,

    #[garde(range(min = 256, max = 4096))]
    #[serde(default = "default_dimension")]
    pub width: u32,

    #[garde(range(min = 256, max = 4096))]
    #[serde(default = "default_dimension")]
    pub height: u32,

    #[garde(range(min = 1, max = 150))]
    #[serde(default = "default_steps")]
    pub steps: u32,

    #[garde(length(min = 1, max = 6))]
    #[serde(default = "default_product_types")]
    pub product_types: Vec<ProductType>,

    /// Storefront names to target; every registered storefront when absent.
    #[garde(skip)]
    #[serde(default)]
    pub platforms: Option<Vec<String>>,

    #[garde(range(min = 0.0, max = 10000.0))]
    #[serde(default)]
    pub price: Option<f64>,

    #[garde(skip)]
    #[serde(default = "default_auto_publish")]
    pub auto_publish: bool,
}

fn default_count() -> u32 {
    1
}

fn default_dimension() -> u32 {
    1024
}

fn default_steps() -> u32 {
    30
}

fn default_product_types() -> Vec<ProductType> {
    vec![ProductType::TShirt]
}

fn default_auto_publish() -> bool {
    true
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            theme: None,
            style: None,
            niche: None,
            count: default_count(),
            width: default_dimension(),
            height: default_dimension(),
            steps: default_steps(),
            product_types: default_product_types(),
            platforms: None,
            price: None,
            auto_publish: default_auto_publish(),
        }
    }
}

impl GenerationRequest {
    pub fn price_for(&self, product_type: ProductType) -> f64 {
        self.price.unwrap_or_else(|| product_type.default_price())
    }
}

/// A stored design produced by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetDescriptor {
    pub id: String,
    pub url: String,
    pub content_hash: String,
    pub prompt: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PublishOutcome {
    Created,
    Published,
    Failed,
}

/// Outcome of one (asset, platform, product type) attempt. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformPublishResult {
    pub platform: String,
    pub product_type: ProductType,
    pub asset_id: String,
    pub outcome: PublishOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlatformPublishResult {
    pub fn failed(
        platform: &str,
        product_type: ProductType,
        asset_id: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.to_string(),
            product_type,
            asset_id: asset_id.to_string(),
            outcome: PublishOutcome::Failed,
            product_id: None,
            product_url: None,
            error: Some(reason.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome != PublishOutcome::Failed
    }
}

/// Aggregate result of one job execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineResult {
    pub assets: Vec<AssetDescriptor>,
    pub publishes: Vec<PlatformPublishResult>,
    /// Non-fatal failures, one per failed platform/asset combination.
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn successful_publishes(&self) -> usize {
        self.publishes.iter().filter(|p| p.succeeded()).count()
    }

    /// With no publish attempts (generation only) a run succeeds when it stored
    /// at least one asset; otherwise at least one publish must have gone through.
    pub fn is_success(&self) -> bool {
        if self.publishes.is_empty() {
            !self.assets.is_empty()
        } else {
            self.successful_publishes() > 0
        }
    }

    /// Append another run's output, keeping order.
    pub fn merge(&mut self, other: PipelineResult) {
        self.assets.extend(other.assets);
        self.publishes.extend(other.publishes);
        self.errors.extend(other.errors);
        self.duration_ms += other.duration_ms;
    }
}
