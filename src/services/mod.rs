pub mod circuit_breaker;
pub mod collaborators;
pub mod engine;
pub mod image_gen;
pub mod orchestrator;
pub mod prompts;
pub mod queue;
pub mod runner;
pub mod storage;
pub mod storefront;
