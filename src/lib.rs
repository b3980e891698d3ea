//! Print-on-demand publishing engine
//!
//! This library provides the job engine (priority queue, bounded concurrency,
//! retry with backoff, snapshot persistence) and the fan-out orchestrator that
//! turns one generation request into stored designs listed on every configured
//! storefront, with a circuit breaker in front of each external dependency.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
