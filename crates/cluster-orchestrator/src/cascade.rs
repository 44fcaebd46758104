//! Propagates failure downward (stop) and recovery downward (restart)
//! through the transitive-dependents set, with correlated stop-reason
//! tracking via the ledger.

use std::sync::Arc;

use tokio::task_local;
use tracing::warn;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::graph::DependencyGraph;
use crate::registry::ServiceRegistry;
use crate::service::Service;
use crate::stop_reason::StopReasonLedger;
use crate::types::{NodeId, ServiceLabel, ServiceState, StopReason};

task_local! {
    static CORRELATION_ID: Option<Uuid>;
}

/// The correlation id of the cascade currently executing on this task, if
/// any. Read by the orchestrator's installed state-change callback when it
/// builds a [`crate::event_bus::StateChangeEvent`].
pub fn current_correlation_id() -> Option<Uuid> {
    CORRELATION_ID.try_with(|id| *id).unwrap_or(None)
}

pub struct CascadeEngine;

impl CascadeEngine {
    /// Reverse-topological stop of every transitive dependent of `service`,
    /// followed by `service` itself last — issued even if `service` already
    /// reached `Failed` on its own, to normalize it to `Stopped`. Every
    /// dependent is marked `Dependency` in the ledger; `service` itself is
    /// never marked here (per design note: its failure state already
    /// implies why it stopped).
    pub async fn stop_with_dependents(
        service: &Arc<dyn Service>,
        graph: &DependencyGraph,
        registry: &ServiceRegistry,
        ledger: &StopReasonLedger,
    ) {
        let node_id = NodeId::for_service(service.label(), service.kind());
        let dependents = graph.transitive_dependents(&node_id);
        let correlation_id = Uuid::new_v4();

        CORRELATION_ID
            .scope(Some(correlation_id), async {
                for dep_id in &dependents {
                    let dep_label = dep_id.label();
                    ledger.set(dep_label.clone(), StopReason::Dependency).await;
                    if let Some(dependent) = registry.get(&dep_label).await {
                        if let Err(err) = dependent.stop().await {
                            warn!(label = %dep_label, error = %err, "cascade stop failed for a dependent");
                        }
                    }
                }
                if let Err(err) = service.stop().await {
                    warn!(label = %service.label(), error = %err, "cascade stop failed for the initiating service");
                }
            })
            .await;
    }

    /// Called once `label` is observed transitioning to `Running`. Every
    /// service whose ledger entry is `Dependency` and which directly
    /// depends on `label` is start-attempted, provided *all* of its other
    /// dependencies are also `Running`; otherwise it is left in `Waiting`.
    pub async fn on_dependency_became_running(
        label: &ServiceLabel,
        graph: &DependencyGraph,
        registry: &ServiceRegistry,
        ledger: &StopReasonLedger,
    ) {
        let Some(became_running) = registry.get(label).await else {
            return;
        };
        let running_node = NodeId::for_service(became_running.label(), became_running.kind());

        for candidate in registry.all().await {
            if !ledger.is_auto_restart_eligible(candidate.label()).await {
                continue;
            }
            let candidate_node = NodeId::for_service(candidate.label(), candidate.kind());
            let deps = graph.dependencies(&candidate_node);
            if !deps.contains(&running_node) {
                continue;
            }

            let mut all_deps_running = true;
            for dep_id in &deps {
                let dep_label = dep_id.label();
                let ready = registry
                    .get(&dep_label)
                    .await
                    .is_some_and(|dep| dep.state() == ServiceState::Running);
                if !ready {
                    all_deps_running = false;
                    break;
                }
            }
            if !all_deps_running {
                continue;
            }

            ledger.clear(candidate.label()).await;
            if let Err(err) = candidate.start().await {
                warn!(label = %candidate.label(), error = %err, "auto-restart failed");
            }
        }
    }

    /// `ledger[label] = Manual`, then a stop cascade. Because only `label`
    /// is marked `Manual`, its dependents land in `Dependency` and so
    /// become eligible for auto-restart once `label` is manually restarted.
    pub async fn stop_service(
        label: &ServiceLabel,
        graph: &DependencyGraph,
        registry: &ServiceRegistry,
        ledger: &StopReasonLedger,
    ) -> Result<()> {
        let service = registry
            .get(label)
            .await
            .ok_or_else(|| OrchestratorError::NotFound { label: label.to_string() })?;
        ledger.set(label.clone(), StopReason::Manual).await;
        Self::stop_with_dependents(&service, graph, registry, ledger).await;
        Ok(())
    }

    /// Clears `ledger[label]`, then restarts it — `Start` if it isn't
    /// currently active, `Restart` otherwise.
    pub async fn restart_service(
        label: &ServiceLabel,
        registry: &ServiceRegistry,
        ledger: &StopReasonLedger,
    ) -> Result<()> {
        let service = registry
            .get(label)
            .await
            .ok_or_else(|| OrchestratorError::NotFound { label: label.to_string() })?;
        ledger.clear(label).await;
        match service.state() {
            ServiceState::Running | ServiceState::Starting => service.restart().await,
            _ => service.start().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::FakeService;
    use crate::types::ServiceKind;

    fn build_chain() -> (DependencyGraph, Arc<FakeService>, Arc<FakeService>) {
        let mut graph = DependencyGraph::new();
        graph.add_node(NodeId::cluster("mc-t"), ServiceKind::KubeConnection, "mc-t".into(), vec![]);
        graph.add_node(
            NodeId::port_forward(&ServiceLabel::new("mc-prom")),
            ServiceKind::PortForward,
            "mc-prom".into(),
            vec![NodeId::cluster("mc-t")],
        );
        graph.add_node(
            NodeId::mcp_server(&ServiceLabel::new("prometheus")),
            ServiceKind::MCPServer,
            "prometheus".into(),
            vec![NodeId::port_forward(&ServiceLabel::new("mc-prom"))],
        );
        let pf = Arc::new(FakeService::new(
            "mc-prom",
            ServiceKind::PortForward,
            vec![NodeId::cluster("mc-t")],
        ));
        let mcp = Arc::new(FakeService::new(
            "prometheus",
            ServiceKind::MCPServer,
            vec![NodeId::port_forward(&ServiceLabel::new("mc-prom"))],
        ));
        (graph, pf, mcp)
    }

    #[tokio::test]
    async fn cascade_stop_marks_dependents_dependency_not_the_initiator() {
        let (graph, pf, mcp) = build_chain();
        let registry = ServiceRegistry::new();
        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        cluster.start().await.unwrap();
        pf.start().await.unwrap();
        mcp.start().await.unwrap();
        registry.register(cluster.clone()).await.unwrap();
        registry.register(pf.clone()).await.unwrap();
        registry.register(mcp.clone()).await.unwrap();
        let ledger = StopReasonLedger::new();

        cluster.force_state(ServiceState::Failed, crate::types::HealthStatus::Unhealthy);
        let initiator: Arc<dyn Service> = cluster.clone();
        CascadeEngine::stop_with_dependents(&initiator, &graph, &registry, &ledger).await;

        assert!(ledger.is_auto_restart_eligible(&ServiceLabel::new("mc-prom")).await);
        assert!(ledger.is_auto_restart_eligible(&ServiceLabel::new("prometheus")).await);
        assert!(ledger.get(&ServiceLabel::new("mc-t")).await.is_none());
        assert_eq!(pf.state(), ServiceState::Stopped);
        assert_eq!(mcp.state(), ServiceState::Stopped);
        assert_eq!(cluster.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn cascade_restart_starts_dependents_in_order_and_clears_ledger() {
        let (graph, pf, mcp) = build_chain();
        let registry = ServiceRegistry::new();
        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        registry.register(cluster.clone()).await.unwrap();
        registry.register(pf.clone()).await.unwrap();
        registry.register(mcp.clone()).await.unwrap();
        let ledger = StopReasonLedger::new();
        ledger.set(ServiceLabel::new("mc-prom"), StopReason::Dependency).await;
        ledger.set(ServiceLabel::new("prometheus"), StopReason::Dependency).await;

        cluster.start().await.unwrap();
        CascadeEngine::on_dependency_became_running(&ServiceLabel::new("mc-t"), &graph, &registry, &ledger).await;
        assert_eq!(pf.state(), ServiceState::Running);
        assert!(ledger.get(&ServiceLabel::new("mc-prom")).await.is_none());
        // prometheus still depends on mc-prom, which just started — its own
        // restart is driven by a second call once mc-prom is observed Running.
        CascadeEngine::on_dependency_became_running(&ServiceLabel::new("mc-prom"), &graph, &registry, &ledger).await;
        assert_eq!(mcp.state(), ServiceState::Running);
        assert!(ledger.get(&ServiceLabel::new("prometheus")).await.is_none());
    }

    #[tokio::test]
    async fn manually_stopped_service_is_not_auto_restarted() {
        let (graph, pf, _mcp) = build_chain();
        let registry = ServiceRegistry::new();
        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        registry.register(cluster.clone()).await.unwrap();
        registry.register(pf.clone()).await.unwrap();
        let ledger = StopReasonLedger::new();
        ledger.set(ServiceLabel::new("mc-prom"), StopReason::Manual).await;

        cluster.start().await.unwrap();
        CascadeEngine::on_dependency_became_running(&ServiceLabel::new("mc-t"), &graph, &registry, &ledger).await;

        assert_eq!(pf.state(), ServiceState::Unknown);
    }

    #[tokio::test]
    async fn stop_service_then_restart_service_round_trips_manual_flag() {
        let (graph, pf, mcp) = build_chain();
        let registry = ServiceRegistry::new();
        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        registry.register(cluster.clone()).await.unwrap();
        registry.register(pf.clone()).await.unwrap();
        registry.register(mcp.clone()).await.unwrap();
        let ledger = StopReasonLedger::new();

        cluster.start().await.unwrap();
        pf.start().await.unwrap();
        mcp.start().await.unwrap();

        CascadeEngine::stop_service(&ServiceLabel::new("mc-prom"), &graph, &registry, &ledger)
            .await
            .unwrap();
        assert!(ledger.is_manual(&ServiceLabel::new("mc-prom")).await);
        assert!(ledger.is_auto_restart_eligible(&ServiceLabel::new("prometheus")).await);
        assert_eq!(mcp.state(), ServiceState::Stopped);

        CascadeEngine::restart_service(&ServiceLabel::new("mc-prom"), &registry, &ledger)
            .await
            .unwrap();
        assert!(ledger.get(&ServiceLabel::new("mc-prom")).await.is_none());
        assert_eq!(pf.state(), ServiceState::Running);

        CascadeEngine::on_dependency_became_running(&ServiceLabel::new("mc-prom"), &graph, &registry, &ledger).await;
        assert_eq!(mcp.state(), ServiceState::Running);
    }
}
