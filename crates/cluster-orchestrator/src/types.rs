//! Shared value types: labels, kinds, states, node ids.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique, stable identifier for a service. Cheap to clone — services,
/// the registry, the DAG, and the ledger all key on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceLabel(String);

impl ServiceLabel {
    /// Build a label from anything string-like.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceLabel {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ServiceLabel {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The kind of a managed service. Startup-group membership and NodeID
/// prefixing are both keyed on this, never on the concrete executor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceKind {
    /// A connection/session against a single kubernetes cluster. Always a DAG leaf.
    KubeConnection,
    /// A `kubectl port-forward`-style tunnel. Depends on a `KubeConnection`.
    PortForward,
    /// An external MCP server subprocess. Depends on `PortForward`s and/or a `KubeConnection`.
    MCPServer,
    /// The aggregator that fronts all MCP servers. No declared dependencies.
    Aggregator,
    /// A user-defined instance that doesn't fit the other kinds.
    GenericInstance,
}

impl ServiceKind {
    /// Startup-group ordering consulted by `StartScheduler::start_all`: all
    /// services sharing a rank start concurrently before the next rank begins.
    pub fn startup_rank(self) -> u8 {
        match self {
            ServiceKind::KubeConnection => 0,
            ServiceKind::Aggregator => 1,
            ServiceKind::PortForward => 2,
            ServiceKind::MCPServer => 3,
            ServiceKind::GenericInstance => 2,
        }
    }
}

/// Lifecycle state of a service, as observed through its state-change callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Never started and no attempt has been made yet.
    Unknown,
    /// Cleanly stopped (by user request, cascade, or normal shutdown).
    Stopped,
    /// Transitioning towards `Running`.
    Starting,
    /// Up and (assumed) serving.
    Running,
    /// Blocked on a dependency that is not yet `Running`; not started.
    Waiting,
    /// Start or runtime failure.
    Failed,
}

impl ServiceState {
    /// Waiting does not satisfy readiness for anything depending on it.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, ServiceState::Running)
    }
}

/// Health as reported by the per-service health-check loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HealthStatus {
    /// No check has completed yet.
    #[default]
    Unknown,
    /// Last probe succeeded.
    Healthy,
    /// Last probe failed or timed out.
    Unhealthy,
}

/// Why a service is currently stopped, if it is. Absence of an entry in the
/// ledger is a distinct third state ("no reason") and must never be conflated
/// with `Dependency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A user explicitly called `StopService`. Never auto-restarted.
    Manual,
    /// The cascade engine (or the scheduler's barrier) stopped/skipped this
    /// service because a dependency isn't `Running`. Eligible for auto-restart.
    Dependency,
}

/// Identifier for a node in the [`crate::graph::DependencyGraph`]. Distinct
/// from [`ServiceLabel`] because the mapping from label to node id depends on
/// `ServiceKind`. The mapping is total and reversible via [`NodeId::label`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    /// `pf:<label>` for a port-forward node.
    pub fn port_forward(label: &ServiceLabel) -> Self {
        Self(format!("pf:{label}"))
    }

    /// `mcp:<label>` for an MCP server node.
    pub fn mcp_server(label: &ServiceLabel) -> Self {
        Self(format!("mcp:{label}"))
    }

    /// A kube connection node is identified by its cluster name directly.
    pub fn cluster(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Aggregator and generic-instance nodes are identified by their label directly.
    pub fn plain(label: &ServiceLabel) -> Self {
        Self(label.as_str().to_string())
    }

    /// The node id that corresponds to a service's own label, given its kind.
    pub fn for_service(label: &ServiceLabel, kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::PortForward => Self::port_forward(label),
            ServiceKind::MCPServer => Self::mcp_server(label),
            ServiceKind::KubeConnection => Self::cluster(label.as_str()),
            ServiceKind::Aggregator | ServiceKind::GenericInstance => Self::plain(label),
        }
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the service label this node id was derived from. The mapping
    /// is reversible by construction: strip the `pf:`/`mcp:` prefix if
    /// present, otherwise the node id *is* the label (cluster, aggregator,
    /// and generic-instance nodes).
    pub fn label(&self) -> ServiceLabel {
        if let Some(rest) = self.0.strip_prefix("pf:") {
            ServiceLabel::new(rest)
        } else if let Some(rest) = self.0.strip_prefix("mcp:") {
            ServiceLabel::new(rest)
        } else {
            ServiceLabel::new(self.0.clone())
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_mapping_is_total_and_distinct_per_kind() {
        let label = ServiceLabel::new("mc-prom");
        assert_eq!(
            NodeId::for_service(&label, ServiceKind::PortForward).as_str(),
            "pf:mc-prom"
        );
        assert_eq!(
            NodeId::for_service(&label, ServiceKind::MCPServer).as_str(),
            "mcp:mc-prom"
        );
        assert_eq!(
            NodeId::for_service(&label, ServiceKind::KubeConnection).as_str(),
            "mc-prom"
        );
        assert_eq!(
            NodeId::for_service(&label, ServiceKind::GenericInstance).as_str(),
            "mc-prom"
        );
    }

    #[test]
    fn waiting_never_satisfies_dependency_invariant() {
        assert!(!ServiceState::Waiting.satisfies_dependency());
        assert!(ServiceState::Running.satisfies_dependency());
    }

    #[test]
    fn node_id_label_recovery_is_reversible() {
        let label = ServiceLabel::new("mc-prom");
        assert_eq!(NodeId::port_forward(&label).label(), label);
        assert_eq!(NodeId::mcp_server(&label).label(), label);
        assert_eq!(NodeId::plain(&label).label(), label);
    }
}
