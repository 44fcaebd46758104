//! Declarative configuration schema and its mapping onto a [`DependencyGraph`].
//!
//! The core never touches the filesystem itself (reading the config file is
//! a host concern); it only owns these `serde`-derived schema types, a
//! string-level parser for the wire format, and the pure function that turns
//! a loaded config into a graph.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cluster::{ClusterDefinition, ClusterRole, ClusterState};
use crate::graph::DependencyGraph;
use crate::types::{NodeId, ServiceKind, ServiceLabel};

fn default_enabled() -> bool {
    true
}

/// Root configuration: every cluster, port-forward, and MCP server the
/// orchestrator should know about.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
    #[serde(default)]
    pub port_forwards: Vec<PortForwardConfig>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

/// One reachable cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub context: String,
    pub role: ClusterRole,
    pub display_name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

impl From<&ClusterConfig> for ClusterDefinition {
    fn from(config: &ClusterConfig) -> Self {
        ClusterDefinition {
            name: config.name.clone(),
            context: config.context.clone(),
            role: config.role,
            display_name: config.display_name.clone(),
            icon: config.icon.clone(),
        }
    }
}

/// One `kubectl port-forward`-style tunnel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForwardConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub local_port: u16,
    pub remote_port: u16,
    pub namespace: String,
    pub target_type: String,
    pub target_name: String,
    #[serde(default)]
    pub bind_address: Option<String>,
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub cluster_role: Option<ClusterRole>,
    #[serde(default)]
    pub kube_context_target: Option<String>,
}

/// One external MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub server_type: String,
    #[serde(default)]
    pub requires_port_forwards: Vec<String>,
    #[serde(default)]
    pub requires_cluster_name: Option<String>,
    #[serde(default)]
    pub requires_cluster_role: Option<ClusterRole>,
}

impl OrchestratorConfig {
    /// Parse a config already read into memory as JSON.
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// Build the cluster index the graph mapping resolves against.
pub fn build_cluster_state(config: &OrchestratorConfig) -> ClusterState {
    ClusterState::new(config.clusters.iter().map(ClusterDefinition::from).collect())
}

/// Map a loaded configuration onto a dependency graph. A node is always
/// added even when one of its references can't be resolved
/// — unresolved references are warnings that omit the edge, never errors
/// that abort the build; the resulting node simply times out its
/// dependency barrier and lands in `Waiting` at start time.
pub fn build_dependency_graph(config: &OrchestratorConfig, clusters: &ClusterState) -> DependencyGraph {
    let mut graph = DependencyGraph::new();

    for cluster in &config.clusters {
        graph.add_node(
            NodeId::cluster(&cluster.name),
            ServiceKind::KubeConnection,
            cluster.display_name.clone(),
            vec![],
        );
    }

    let known_port_forwards: std::collections::HashSet<&str> = config
        .port_forwards
        .iter()
        .filter(|pf| pf.enabled)
        .map(|pf| pf.name.as_str())
        .collect();

    for pf in config.port_forwards.iter().filter(|pf| pf.enabled) {
        let mut deps = Vec::new();
        match clusters.resolve(
            pf.cluster_name.as_deref(),
            pf.cluster_role,
            pf.kube_context_target.as_deref(),
        ) {
            Some(cluster_name) => deps.push(NodeId::cluster(&cluster_name)),
            None => warn!(port_forward = %pf.name, "unresolved cluster reference; starting without this edge"),
        }
        graph.add_node(
            NodeId::port_forward(&ServiceLabel::new(pf.name.clone())),
            ServiceKind::PortForward,
            pf.name.clone(),
            deps,
        );
    }

    let mut any_mcp_enabled = false;
    for mcp in config.mcp_servers.iter().filter(|mcp| mcp.enabled) {
        any_mcp_enabled = true;
        let mut deps = Vec::new();
        for pf_name in &mcp.requires_port_forwards {
            if known_port_forwards.contains(pf_name.as_str()) {
                deps.push(NodeId::port_forward(&ServiceLabel::new(pf_name.clone())));
            } else {
                warn!(mcp_server = %mcp.name, port_forward = %pf_name, "unresolved port-forward reference; starting without this edge");
            }
        }
        if mcp.requires_cluster_name.is_some() || mcp.requires_cluster_role.is_some() {
            match clusters.resolve(mcp.requires_cluster_name.as_deref(), mcp.requires_cluster_role, None) {
                Some(cluster_name) => deps.push(NodeId::cluster(&cluster_name)),
                None => warn!(mcp_server = %mcp.name, "unresolved cluster reference; starting without this edge"),
            }
        }
        graph.add_node(
            NodeId::mcp_server(&ServiceLabel::new(mcp.name.clone())),
            ServiceKind::MCPServer,
            mcp.name.clone(),
            deps,
        );
    }

    if any_mcp_enabled {
        graph.add_node(
            NodeId::plain(&ServiceLabel::new("aggregator")),
            ServiceKind::Aggregator,
            "aggregator".to_string(),
            vec![],
        );
    }

    graph
}
