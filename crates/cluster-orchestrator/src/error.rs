//! Error types for the orchestrator core.
//!
//! Every failure mode is a tagged variant rather than a loosely-typed string
//! so callers can match on `kind` instead of parsing message strings. Background
//! work (scheduler tasks, the cascade engine, health loops, the monitor loop)
//! never propagates these to a caller — it logs them and folds the failure
//! into service state / published events instead. Only user-driven methods
//! (`StartService`, `StopService`, `RestartService`, `SwitchCluster`,
//! `Reconfigure`) return them directly.

use crate::cluster::ClusterRole;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Tagged error kinds produced by the orchestrator core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    /// No service is registered under this label.
    #[error("service not found: {label}")]
    NotFound {
        /// The label that was looked up.
        label: String,
    },

    /// `Register` was called twice for the same label.
    #[error("service already registered: {label}")]
    DuplicateLabel {
        /// The label that collided.
        label: String,
    },

    /// Configuration could not be turned into a valid dependency graph.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// Human-readable explanation.
        message: String,
    },

    /// The resolved edges contain a cycle; `witness` names one node on it.
    #[error("dependency cycle detected, starting from: {witness}")]
    CycleDetected {
        /// One node id that participates in the cycle.
        witness: String,
    },

    /// `SwitchCluster` referenced a cluster name that doesn't exist for that role.
    #[error("no cluster named {name} for role {role:?}")]
    UnknownCluster {
        /// The role the caller asked about.
        role: ClusterRole,
        /// The cluster name that could not be found.
        name: String,
    },

    /// A dependency barrier observed a dependency that is not yet `Running`.
    #[error("dependency {dependency} not ready for {label}")]
    DependencyNotReady {
        /// The dependent service.
        label: String,
        /// The dependency that isn't ready.
        dependency: String,
    },

    /// A dependency barrier fast-failed because a dependency is `Failed`.
    #[error("dependency {dependency} failed for {label}")]
    DependencyFailed {
        /// The dependent service.
        label: String,
        /// The dependency that failed.
        dependency: String,
    },

    /// A dependency barrier exceeded its timeout.
    #[error("timed out waiting on dependencies for {label}")]
    DependencyTimeout {
        /// The service whose barrier timed out.
        label: String,
    },

    /// `Service::start` returned an error.
    #[error("service {label} failed to start: {message}")]
    ServiceStartFailed {
        /// The service that failed to start.
        label: String,
        /// The underlying failure.
        message: String,
    },

    /// `Service::stop` returned an error.
    #[error("service {label} failed to stop: {message}")]
    ServiceStopFailed {
        /// The service that failed to stop.
        label: String,
        /// The underlying failure.
        message: String,
    },

    /// `Service::check_health` returned an error.
    #[error("health check failed for {label}: {message}")]
    HealthCheckFailed {
        /// The service whose probe failed.
        label: String,
        /// The underlying failure.
        message: String,
    },

    /// The root context was cancelled mid-operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl OrchestratorError {
    /// Stable, lowercase kind tag for structured logging and matching.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::DuplicateLabel { .. } => "duplicate_label",
            Self::InvalidConfiguration { .. } => "invalid_configuration",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::UnknownCluster { .. } => "unknown_cluster",
            Self::DependencyNotReady { .. } => "dependency_not_ready",
            Self::DependencyFailed { .. } => "dependency_failed",
            Self::DependencyTimeout { .. } => "dependency_timeout",
            Self::ServiceStartFailed { .. } => "service_start_failed",
            Self::ServiceStopFailed { .. } => "service_stop_failed",
            Self::HealthCheckFailed { .. } => "health_check_failed",
            Self::Cancelled => "cancelled",
        }
    }
}
