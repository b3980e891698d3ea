//! Request and configuration fixtures

#![allow(dead_code)]

use pod_publish_engine::models::job::{BatchRequest, JobPriority, JobRequest, SubmitOptions};
use pod_publish_engine::models::pipeline::{GenerationRequest, ProductType};
use pod_publish_engine::services::circuit_breaker::BreakerConfig;
use pod_publish_engine::services::engine::EngineConfig;
use pod_publish_engine::services::orchestrator::OrchestratorConfig;
use std::path::PathBuf;
use std::time::Duration;

pub fn generation(theme: &str, count: u32) -> GenerationRequest {
    GenerationRequest {
        theme: Some(theme.to_string()),
        style: Some("flat vector".to_string()),
        count,
        ..Default::default()
    }
}

pub fn single(theme: &str) -> JobRequest {
    JobRequest::SingleGeneration(generation(theme, 1))
}

pub fn batch(themes: &[&str]) -> JobRequest {
    JobRequest::BatchGeneration(BatchRequest {
        requests: themes.iter().map(|theme| generation(theme, 1)).collect(),
    })
}

pub fn with_products(mut request: GenerationRequest, product_types: Vec<ProductType>) -> GenerationRequest {
    request.product_types = product_types;
    request
}

pub fn priority(priority: JobPriority) -> SubmitOptions {
    SubmitOptions {
        priority,
        max_retries: None,
    }
}

pub fn retries(max_retries: u32) -> SubmitOptions {
    SubmitOptions {
        priority: JobPriority::Normal,
        max_retries: Some(max_retries),
    }
}

/// Millisecond-scale timings so retries and timeouts finish quickly.
pub fn fast_engine(max_concurrent_jobs: usize) -> EngineConfig {
    EngineConfig {
        max_concurrent_jobs,
        job_timeout: Duration::from_secs(5),
        retry_delay: Duration::from_millis(20),
        default_max_retries: 3,
        persistence_path: None,
        persist_interval: Duration::from_secs(60),
    }
}

pub fn sensitive_breakers(failure_threshold: u32) -> OrchestratorConfig {
    let breaker = BreakerConfig {
        failure_threshold,
        cooldown: Duration::from_secs(60),
    };
    OrchestratorConfig {
        image_concurrency: 3,
        image_breaker: breaker,
        platform_breaker: breaker,
    }
}

/// Breakers that open on the first failure and cool down almost immediately.
pub fn twitchy_breakers() -> OrchestratorConfig {
    let breaker = BreakerConfig {
        failure_threshold: 1,
        cooldown: Duration::from_millis(10),
    };
    OrchestratorConfig {
        image_concurrency: 3,
        image_breaker: breaker,
        platform_breaker: breaker,
    }
}

/// Fresh snapshot path under the system temp dir.
pub fn snapshot_path() -> PathBuf {
    std::env::temp_dir()
        .join("pod-publish-engine-tests")
        .join(format!("{}.json", uuid::Uuid::new_v4()))
}
