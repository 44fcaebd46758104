//! Dependency-graph-driven supervisor for long-running cluster services.
//!
//! This crate manages the lifecycle of heterogeneous services — kubernetes
//! cluster connections, port-forward tunnels, external MCP server
//! processes, the aggregator fronting them, and user-defined instances — as
//! nodes in a directed acyclic dependency graph. It starts services level
//! by level so a dependent never runs ahead of its dependencies, cascades
//! failure and recovery through the transitive-dependents set while
//! preserving user intent for manual stops, runs a per-service health-check
//! loop, and fans state-change events out to any number of subscribers.
//!
//! The concrete work each service kind performs — actually shelling out to
//! a cluster CLI, holding a port-forward tunnel open, managing an MCP
//! subprocess — is an external collaborator this crate never implements.
//! A host plugs one in by implementing [`service::ServiceExecutor`] and
//! wrapping it in [`service::ManagedService`].

pub mod cascade;
pub mod cluster;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod graph;
pub mod health;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod stop_reason;
pub mod types;

pub use cascade::CascadeEngine;
pub use cluster::{ClusterDefinition, ClusterRole, ClusterState};
pub use config::{build_cluster_state, build_dependency_graph, ClusterConfig, McpServerConfig, OrchestratorConfig, PortForwardConfig};
pub use error::{OrchestratorError, Result};
pub use event_bus::{EventBus, StateChangeEvent};
pub use graph::{DependencyGraph, DependencyNode};
pub use health::HealthCheckLoop;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ServiceStatus};
pub use registry::ServiceRegistry;
pub use scheduler::{wait_for_dependencies, StartScheduler};
pub use service::{HealthChecker, ManagedService, Service, ServiceExecutor, StateChangeCallback, StateUpdater};
pub use stop_reason::StopReasonLedger;
pub use types::{HealthStatus, NodeId, ServiceKind, ServiceLabel, ServiceState, StopReason};
