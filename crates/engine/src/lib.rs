//! Delay prediction pipeline: sample store, model registry, prediction
//! orchestrator and accuracy tracker.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod sample_store;
pub mod tracker;

pub use config::EngineConfig;
pub use engine::{Engine, Ingested};
