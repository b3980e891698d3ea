//! Fan-out pipeline: prompts -> images -> storage -> every storefront.
//!
//! Prompt and image stages are fatal when they produce nothing. The publish
//! stage settles every (asset, product type, platform) attempt independently;
//! its failures are collected in `PipelineResult::errors` and never abort
//! sibling attempts.

use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::instrument;

use crate::models::pipeline::{
    AssetDescriptor, GenerationRequest, PipelineResult, PlatformPublishResult, ProductType,
    PublishOutcome,
};
use crate::services::circuit_breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::services::collaborators::{
    AssetMetadata, AssetStore, GenerationStatus, ImageData, ImageSource, PlatformAdapter,
    PlatformRegistry, ProductListing, PromptIdea, PromptQuery, PromptSource,
};

/// Dependency name of the image backend in stats and health.
pub const IMAGE_DEPENDENCY: &str = "image_backend";

const CIRCUIT_OPEN: &str = "circuit open";

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Image generation calls in flight per run.
    pub image_concurrency: usize,
    pub image_breaker: BreakerConfig,
    /// Applied to each storefront's breaker.
    pub platform_breaker: BreakerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            image_concurrency: 3,
            image_breaker: BreakerConfig::default(),
            platform_breaker: BreakerConfig::default(),
        }
    }
}

/// External systems a run drives.
#[derive(Clone)]
pub struct Collaborators {
    pub prompts: Arc<dyn PromptSource>,
    pub images: Arc<dyn ImageSource>,
    pub assets: Arc<dyn AssetStore>,
    pub platforms: PlatformRegistry,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyStats {
    pub name: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub successes: u64,
    pub failures: u64,
    /// Calls rejected without contacting the dependency.
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub runs: u64,
    pub fatal_runs: u64,
    pub dependencies: Vec<DependencyStats>,
}

struct PublishTarget {
    adapter: Arc<dyn PlatformAdapter>,
    breaker: Arc<CircuitBreaker>,
}

pub struct FanOutOrchestrator {
    config: OrchestratorConfig,
    collaborators: Collaborators,
    image_breaker: Arc<CircuitBreaker>,
    platform_breakers: HashMap<String, Arc<CircuitBreaker>>,
    skipped: Mutex<HashMap<String, u64>>,
    runs: AtomicU64,
    fatal_runs: AtomicU64,
}

impl FanOutOrchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let platform_breakers = collaborators
            .platforms
            .names()
            .into_iter()
            .map(|name| {
                let breaker = Arc::new(CircuitBreaker::new(name.clone(), config.platform_breaker));
                (name, breaker)
            })
            .collect();

        Self {
            image_breaker: Arc::new(CircuitBreaker::new(IMAGE_DEPENDENCY, config.image_breaker)),
            platform_breakers,
            config,
            collaborators,
            skipped: Mutex::new(HashMap::new()),
            runs: AtomicU64::new(0),
            fatal_runs: AtomicU64::new(0),
        }
    }

    pub fn image_breaker(&self) -> &CircuitBreaker {
        &self.image_breaker
    }

    pub fn platform_breaker(&self, platform: &str) -> Option<&CircuitBreaker> {
        self.platform_breakers.get(platform).map(Arc::as_ref)
    }

    /// Turn one generation request into a pipeline result.
    ///
    /// Errors only when no prompts or no images come back; anything that goes
    /// wrong later is reported through `PipelineResult::errors`.
    #[instrument(skip_all, fields(count = request.count, theme = ?request.theme))]
    pub async fn run<F>(&self, request: &GenerationRequest, progress: F) -> Result<PipelineResult, PipelineError>
    where
        F: Fn(u8) + Send + Sync,
    {
        self.runs.fetch_add(1, Ordering::Relaxed);
        let result = self.run_stages(request, &progress).await;
        if let Err(e) = &result {
            self.fatal_runs.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "Pipeline run failed");
        }
        result
    }

    async fn run_stages<F>(&self, request: &GenerationRequest, progress: &F) -> Result<PipelineResult, PipelineError>
    where
        F: Fn(u8) + Send + Sync,
    {
        let started = Instant::now();
        let mut errors = Vec::new();

        // Stage 1: prompts
        let query = PromptQuery {
            theme: request.theme.clone(),
            style: request.style.clone(),
            niche: request.niche.clone(),
            count: request.count,
        };
        let mut ideas = self
            .collaborators
            .prompts
            .generate_prompts(&query)
            .await
            .map_err(|e| PipelineError::Prompts(e.to_string()))?;
        ideas.truncate(request.count as usize);
        if ideas.is_empty() {
            return Err(PipelineError::NoPrompts);
        }
        tracing::info!(prompts = ideas.len(), "Prompts generated");
        progress(10);

        // Stage 2: images, bounded window
        let total = ideas.len();
        let mut generations = futures::stream::iter(ideas)
            .map(move |idea| async move {
                let outcome = self.generate_one(&idea, request).await;
                (idea, outcome)
            })
            .buffered(self.config.image_concurrency.max(1));

        let mut images = Vec::with_capacity(total);
        let mut finished = 0;
        while let Some((idea, outcome)) = generations.next().await {
            finished += 1;
            progress(10 + (50 * finished / total) as u8);
            match outcome {
                Ok(url) => images.push((idea, url)),
                Err(reason) => errors.push(format!("image generation failed for '{}': {}", idea.title, reason)),
            }
        }
        drop(generations);

        if images.is_empty() {
            return Err(PipelineError::NoImages {
                attempted: total,
                reason: errors.first().cloned().unwrap_or_default(),
            });
        }
        tracing::info!(images = images.len(), failed = total - images.len(), "Images generated");

        // Stage 3: storage, deduplicated by content hash
        let saves = images.into_iter().map(move |(idea, url)| async move {
            let metadata = AssetMetadata {
                title: idea.title.clone(),
                prompt: idea.prompt_text.clone(),
                tags: idea.tags.clone(),
            };
            let saved = self.collaborators.assets.save_image(ImageData::Url(url), &metadata).await;
            (idea, saved)
        });

        let mut assets: Vec<AssetDescriptor> = Vec::new();
        let mut seen = HashSet::new();
        for (idea, saved) in join_all(saves).await {
            match saved {
                Ok(stored) if !seen.insert(stored.id.clone()) => {
                    tracing::debug!(asset_id = %stored.id, "Duplicate design in run, not publishing twice");
                }
                Ok(stored) => assets.push(AssetDescriptor {
                    id: stored.id,
                    url: stored.url,
                    content_hash: stored.content_hash,
                    prompt: idea.prompt_text,
                    title: idea.title,
                    description: idea.description,
                    tags: idea.tags,
                }),
                Err(e) => errors.push(format!("storage failed for '{}': {}", idea.title, e)),
            }
        }
        progress(70);

        // Stage 4: fan-out to every storefront, settle all
        let targets = self.resolve_targets(request, &mut errors);
        let mut attempts = Vec::new();
        for asset in &assets {
            for &product_type in &request.product_types {
                for target in &targets {
                    if target.adapter.supports(product_type) {
                        attempts.push(self.publish_one(target, asset, product_type, request));
                    }
                }
            }
        }
        let publishes = join_all(attempts).await;

        errors.extend(publishes.iter().filter(|p| !p.succeeded()).map(|p| {
            format!(
                "{}/{} for asset {}: {}",
                p.platform,
                p.product_type,
                p.asset_id,
                p.error.as_deref().unwrap_or("unknown error")
            )
        }));

        let result = PipelineResult {
            assets,
            publishes,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            assets = result.assets.len(),
            published = result.successful_publishes(),
            errors = result.errors.len(),
            duration_ms = result.duration_ms,
            "Pipeline run finished"
        );
        Ok(result)
    }

    async fn generate_one(&self, idea: &PromptIdea, request: &GenerationRequest) -> Result<String, String> {
        let Some(permit) = self.image_breaker.try_acquire() else {
            self.note_skipped(IMAGE_DEPENDENCY);
            return Err(CIRCUIT_OPEN.to_string());
        };

        let generated = AssertUnwindSafe(self.collaborators.images.generate_image(
            &idea.prompt_text,
            request.width,
            request.height,
            request.steps,
        ))
        .catch_unwind()
        .await;

        match generated {
            Ok(Ok(image)) if image.status == GenerationStatus::Completed => {
                match image.image_urls.into_iter().next() {
                    Some(url) => {
                        permit.success();
                        Ok(url)
                    }
                    None => {
                        permit.failure();
                        Err("backend returned no images".to_string())
                    }
                }
            }
            Ok(Ok(image)) => {
                permit.failure();
                Err(image.error.unwrap_or_else(|| "generation failed".to_string()))
            }
            Ok(Err(e)) => {
                permit.failure();
                Err(e.to_string())
            }
            Err(_) => {
                permit.failure();
                tracing::error!(title = %idea.title, "Image backend client panicked");
                Err("image backend panicked".to_string())
            }
        }
    }

    fn resolve_targets(&self, request: &GenerationRequest, errors: &mut Vec<String>) -> Vec<PublishTarget> {
        let names = request
            .platforms
            .clone()
            .unwrap_or_else(|| self.collaborators.platforms.names());

        let mut targets = Vec::new();
        for name in names {
            let adapter = self.collaborators.platforms.get(&name);
            let breaker = self.platform_breakers.get(&name);
            match (adapter, breaker) {
                (Some(adapter), Some(breaker)) => targets.push(PublishTarget {
                    adapter: Arc::clone(adapter),
                    breaker: Arc::clone(breaker),
                }),
                _ => errors.push(format!("platform '{name}' is not registered")),
            }
        }
        targets
    }

    /// One isolated publish attempt. Never fails; every problem becomes a failed result.
    async fn publish_one(
        &self,
        target: &PublishTarget,
        asset: &AssetDescriptor,
        product_type: ProductType,
        request: &GenerationRequest,
    ) -> PlatformPublishResult {
        let platform = target.adapter.name();

        let Some(permit) = target.breaker.try_acquire() else {
            self.note_skipped(platform);
            record_publish(platform, PublishOutcome::Failed);
            return PlatformPublishResult::failed(platform, product_type, &asset.id, CIRCUIT_OPEN);
        };

        let listing = ProductListing {
            asset_url: asset.url.clone(),
            title: asset.title.clone(),
            description: asset.description.clone(),
            price: request.price_for(product_type),
            tags: asset.tags.clone(),
            product_type,
        };

        let attempt = AssertUnwindSafe(target.adapter.create_product(&listing))
            .catch_unwind()
            .await;
        let created = match attempt {
            Ok(Ok(created)) => {
                permit.success();
                created
            }
            Ok(Err(e)) => {
                permit.failure();
                tracing::warn!(platform, asset_id = %asset.id, %product_type, error = %e, "Product creation failed");
                record_publish(platform, PublishOutcome::Failed);
                return PlatformPublishResult::failed(platform, product_type, &asset.id, e.to_string());
            }
            Err(_) => {
                permit.failure();
                tracing::error!(platform, asset_id = %asset.id, %product_type, "Storefront adapter panicked");
                record_publish(platform, PublishOutcome::Failed);
                return PlatformPublishResult::failed(platform, product_type, &asset.id, "adapter panicked");
            }
        };

        let mut outcome = PublishOutcome::Created;
        if request.auto_publish && target.adapter.supports_publish() {
            let published = AssertUnwindSafe(target.adapter.publish(&created.platform_product_id))
                .catch_unwind()
                .await;
            match published {
                Ok(Ok(true)) => outcome = PublishOutcome::Published,
                Ok(Ok(false)) => {
                    tracing::debug!(platform, product_id = %created.platform_product_id, "Product created but left unpublished");
                }
                Ok(Err(e)) => {
                    tracing::warn!(platform, product_id = %created.platform_product_id, error = %e, "Publish failed after create");
                }
                Err(_) => {
                    tracing::error!(platform, product_id = %created.platform_product_id, "Storefront adapter panicked while publishing");
                }
            }
        }

        tracing::info!(platform, asset_id = %asset.id, %product_type, %outcome, "Product listed");
        record_publish(platform, outcome);
        PlatformPublishResult {
            platform: platform.to_string(),
            product_type,
            asset_id: asset.id.clone(),
            outcome,
            product_id: Some(created.platform_product_id),
            product_url: created.product_url,
            error: None,
        }
    }

    fn note_skipped(&self, dependency: &str) {
        let mut skipped = self.skipped.lock().unwrap_or_else(PoisonError::into_inner);
        *skipped.entry(dependency.to_string()).or_default() += 1;
    }

    pub fn stats(&self) -> OrchestratorStats {
        let skipped = self
            .skipped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut breakers: Vec<&CircuitBreaker> = vec![&self.image_breaker];
        let mut names: Vec<&String> = self.platform_breakers.keys().collect();
        names.sort();
        breakers.extend(names.into_iter().filter_map(|n| self.platform_breaker(n)));

        let dependencies = breakers
            .into_iter()
            .map(|breaker| {
                let snapshot = breaker.snapshot();
                DependencyStats {
                    skipped: skipped.get(&snapshot.name).copied().unwrap_or(0),
                    name: snapshot.name,
                    state: snapshot.state,
                    consecutive_failures: snapshot.failure_count,
                    successes: snapshot.total_successes,
                    failures: snapshot.total_failures,
                }
            })
            .collect();

        OrchestratorStats {
            runs: self.runs.load(Ordering::Relaxed),
            fatal_runs: self.fatal_runs.load(Ordering::Relaxed),
            dependencies,
        }
    }
}

fn record_publish(platform: &str, outcome: PublishOutcome) {
    metrics::counter!(
        "platform_publish_total",
        "platform" => platform.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Prompt generation failed: {0}")]
    Prompts(String),

    #[error("Prompt generator returned no prompts")]
    NoPrompts,

    #[error("No images generated ({attempted} attempted): {reason}")]
    NoImages { attempted: usize, reason: String },
}
