// Library exports for integration testing
//
// This file exposes internal modules for integration tests while keeping
// the binary entrypoint in main.rs

pub mod analyzer;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod engine;
pub mod image;
pub mod metrics;
pub mod models;
pub mod recheck;
pub mod registry;

pub use config::HeimdallConfig;
pub use engine::{EngineError, ImageCheckEngine};
pub use models::{CatalogueTag, ClusterImage, ImageReference, ReportResult};
