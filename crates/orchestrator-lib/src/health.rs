//! Dependency health tracking for the orchestrator
//!
//! Every outbound dependency is represented by its circuit breaker. After a
//! run the breaker states are folded into a registry so the report can say
//! which collaborators were healthy while it was produced.

use crate::resilience::{BreakerSnapshot, CircuitState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is recovering or partially failing
    Degraded,
    /// Component is failing fast
    Unhealthy,
}

impl From<CircuitState> for ComponentStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => ComponentStatus::Healthy,
            CircuitState::HalfOpen => ComponentStatus::Degraded,
            CircuitState::Open => ComponentStatus::Unhealthy,
        }
    }
}

/// Information about a component's health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Health implied by a breaker snapshot
    pub fn from_breaker(snapshot: &BreakerSnapshot) -> Self {
        let detail = || match &snapshot.last_error {
            Some(error) => format!(
                "circuit {} after {} consecutive failures: {}",
                snapshot.state, snapshot.consecutive_failures, error
            ),
            None => format!("circuit {}", snapshot.state),
        };
        match ComponentStatus::from(snapshot.state) {
            ComponentStatus::Healthy => Self::healthy(),
            ComponentStatus::Degraded => Self::degraded(detail()),
            ComponentStatus::Unhealthy => Self::unhealthy(detail()),
        }
    }
}

/// Overall health of every tracked component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthReport {
    /// Compute overall status from component statuses
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }

    /// Names of components that are not healthy
    pub fn unhealthy_components(&self) -> Vec<&str> {
        self.components
            .iter()
            .filter(|(_, health)| health.status != ComponentStatus::Healthy)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            components: BTreeMap::new(),
        }
    }
}

/// Health registry keyed by dependency name
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Replace the health of every dependency with its breaker state
    pub async fn record_breakers(&self, snapshots: &[BreakerSnapshot]) {
        let mut components = self.components.write().await;
        for snapshot in snapshots {
            components.insert(
                snapshot.dependency.clone(),
                ComponentHealth::from_breaker(snapshot),
            );
        }
    }

    pub async fn health(&self) -> HealthReport {
        let components = self.components.read().await.clone();
        let status = HealthReport::compute_status(&components);
        HealthReport { status, components }
    }
}
