use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::circuit_breaker::BreakerConfig;
use crate::services::engine::EngineConfig;
use crate::services::orchestrator::OrchestratorConfig;
use crate::services::storefront::StorefrontSettings;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Jobs allowed to run at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Wall-clock limit for one execution attempt
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Base delay of the retry backoff
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Snapshot file; jobs are kept in memory only when unset
    pub persistence_path: Option<PathBuf>,

    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    /// Image generation calls in flight per pipeline run
    #[serde(default = "default_image_concurrency")]
    pub image_concurrency: usize,

    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,

    /// RunPod-style runsync endpoint
    pub image_api_url: String,
    pub image_api_token: String,

    /// Prompt generation service base URL
    pub prompt_api_url: String,
    pub prompt_api_token: Option<String>,

    /// R2 storage; an in-memory store is used when the bucket is unset
    pub r2_bucket: Option<String>,
    pub r2_endpoint: Option<String>,
    pub r2_access_key: Option<String>,
    pub r2_secret_key: Option<String>,
    pub r2_public_url: Option<String>,

    /// Comma-separated `name=base_url` entries
    #[serde(default)]
    pub storefronts: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_job_timeout_secs() -> u64 {
    600
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_persist_interval_secs() -> u64 {
    30
}

fn default_image_concurrency() -> usize {
    3
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_secs() -> u64 {
    60
}

/// Complete R2 credentials, when every piece is configured.
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub public_url: &'a str,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            default_max_retries: self.default_max_retries,
            persistence_path: self.persistence_path.clone(),
            persist_interval: Duration::from_secs(self.persist_interval_secs),
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            cooldown: Duration::from_secs(self.breaker_cooldown_secs),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            image_concurrency: self.image_concurrency,
            image_breaker: self.breaker_config(),
            platform_breaker: self.breaker_config(),
        }
    }

    pub fn r2_settings(&self) -> Option<R2Settings<'_>> {
        Some(R2Settings {
            bucket: self.r2_bucket.as_deref()?,
            endpoint: self.r2_endpoint.as_deref()?,
            access_key: self.r2_access_key.as_deref()?,
            secret_key: self.r2_secret_key.as_deref()?,
            public_url: self.r2_public_url.as_deref()?,
        })
    }

    /// Storefronts that have an `<NAME>_API_TOKEN` in the environment.
    pub fn storefront_settings(&self) -> Vec<StorefrontSettings> {
        StorefrontSettings::from_entries(&self.storefronts, |key| std::env::var(key).ok())
    }
}
