//! Orchestrator library for resilient cloud cost analysis
//!
//! This crate provides the core functionality for:
//! - Resilient outbound calls (TTL cache, retry, circuit breaker)
//! - Fan-out inventory collection with partial-failure isolation
//! - Batched recommendation analysis and cost forecasting
//! - Budget evaluation and report aggregation
//! - Dependency health and observability

pub mod analysis;
pub mod collector;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod report;
pub mod resilience;

pub use config::OrchestratorSettings;
pub use engine::{CostAnalysisEngine, CostAnalysisEngineBuilder, EngineConfig};
pub use error::{CallError, EngineError, ErrorKind};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthReport};
pub use models::*;
pub use observability::{OrchestratorMetrics, StructuredLogger};
pub use report::{JsonFileSink, Report, ReportSink};
