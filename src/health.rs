//! Readiness checks for the infrastructure the relay depends on.

use std::fmt;
use std::sync::Arc;

/// A component that can report whether it is reachable.
pub trait HealthCheck: Send + Sync {
    /// Short component name used in reports and logs ("database", "broker", ...).
    fn name(&self) -> &'static str;

    fn check(&self) -> Result<(), HealthError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HealthError {
    #[error("{component} unavailable: {reason}")]
    Unavailable {
        component: &'static str,
        reason: String,
    },
}

impl HealthError {
    pub fn unavailable(component: &'static str, reason: impl fmt::Display) -> Self {
        HealthError::Unavailable {
            component,
            reason: reason.to_string(),
        }
    }
}

/// Outcome of checking every registered component.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    pub components: Vec<(&'static str, Result<(), HealthError>)>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.components.iter().all(|(_, status)| status.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &HealthError> {
        self.components
            .iter()
            .filter_map(|(_, status)| status.as_ref().err())
    }
}

/// Run every check, in order, without stopping at the first failure.
pub fn check_all(checks: &[Arc<dyn HealthCheck>]) -> ReadinessReport {
    ReadinessReport {
        components: checks
            .iter()
            .map(|check| (check.name(), check.check()))
            .collect(),
    }
}
