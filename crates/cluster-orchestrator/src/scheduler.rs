//! Groups services by startup order and starts each group in parallel,
//! gating the later groups on a per-service dependency barrier.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::{OrchestratorError, Result};
use crate::graph::DependencyGraph;
use crate::registry::ServiceRegistry;
use crate::service::Service;
use crate::stop_reason::StopReasonLedger;
use crate::types::{NodeId, ServiceKind, ServiceLabel, ServiceState, StopReason};

const BARRIER_TIMEOUT: Duration = Duration::from_secs(5);
const BARRIER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Startup proceeds rank by rank per [`ServiceKind::startup_rank`]: kube
/// connections are leaves (rank 0), the aggregator has no declared
/// dependencies but is sequenced right after connections so runtime-registered
/// MCP servers can attach to it (rank 1), port-forwards and generic instances
/// share a rank since neither depends on the other (rank 2), and MCP servers
/// depend on port-forwards and/or kube connections (rank 3).
const STARTUP_RANKS: std::ops::RangeInclusive<u8> = 0..=3;

enum DependencyCheck {
    Ready,
    NotReady,
    Failed(ServiceLabel),
}

async fn check_dependencies(deps: &[NodeId], registry: &ServiceRegistry) -> DependencyCheck {
    let mut all_ready = true;
    for dep_id in deps {
        let dep_label = dep_id.label();
        match registry.get(&dep_label).await {
            Some(dep) => match dep.state() {
                ServiceState::Running => {}
                ServiceState::Failed => return DependencyCheck::Failed(dep_label),
                _ => all_ready = false,
            },
            None => all_ready = false,
        }
    }
    if all_ready {
        DependencyCheck::Ready
    } else {
        DependencyCheck::NotReady
    }
}

/// Waits until every direct dependency of `(label, kind)` is `Running`,
/// polling at a fixed cadence. Fails fast the moment any dependency is
/// observed `Failed`; otherwise fails with `DependencyTimeout` once the
/// overall deadline elapses.
pub async fn wait_for_dependencies(
    label: &ServiceLabel,
    kind: ServiceKind,
    graph: &DependencyGraph,
    registry: &ServiceRegistry,
) -> Result<()> {
    let node_id = NodeId::for_service(label, kind);
    let deps = graph.dependencies(&node_id);
    if deps.is_empty() {
        return Ok(());
    }

    let poll = async {
        loop {
            match check_dependencies(&deps, registry).await {
                DependencyCheck::Ready => return Ok(()),
                DependencyCheck::Failed(dependency) => {
                    return Err(OrchestratorError::DependencyFailed {
                        label: label.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
                DependencyCheck::NotReady => sleep(BARRIER_POLL_INTERVAL).await,
            }
        }
    };

    match timeout(BARRIER_TIMEOUT, poll).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::DependencyTimeout {
            label: label.to_string(),
        }),
    }
}

/// Non-blocking snapshot check: are every one of `(label, kind)`'s direct
/// dependencies `Running` right now? Used by the monitor loop's retry path,
/// which wants a single poll rather than the full barrier with its timeout.
pub async fn dependencies_ready(
    label: &ServiceLabel,
    kind: ServiceKind,
    graph: &DependencyGraph,
    registry: &ServiceRegistry,
) -> bool {
    let node_id = NodeId::for_service(label, kind);
    let deps = graph.dependencies(&node_id);
    matches!(check_dependencies(&deps, registry).await, DependencyCheck::Ready)
}

/// Starts every non-`Manual` registered service, level by level.
pub struct StartScheduler;

impl StartScheduler {
    /// Register every node's current snapshot and start it group by group.
    /// Each group's services start concurrently; the scheduler only waits
    /// for the group it is currently running, never for later ones.
    pub async fn start_all(
        registry: Arc<ServiceRegistry>,
        graph: Arc<DependencyGraph>,
        ledger: Arc<StopReasonLedger>,
    ) {
        let mut startable = Vec::new();
        for service in registry.all().await {
            if !ledger.is_manual(service.label()).await {
                startable.push(service);
            }
        }

        for rank in STARTUP_RANKS {
            let group: Vec<_> = startable
                .iter()
                .filter(|s| s.kind().startup_rank() == rank)
                .cloned()
                .collect();
            if group.is_empty() {
                continue;
            }

            let mut handles = Vec::with_capacity(group.len());
            for service in group {
                let graph = graph.clone();
                let registry = registry.clone();
                let ledger = ledger.clone();
                handles.push(tokio::spawn(async move {
                    Self::start_one(service, &graph, &registry, &ledger).await;
                }));
            }
            for handle in handles {
                if let Err(join_err) = handle.await {
                    warn!(error = %join_err, "start task panicked");
                }
            }
        }
    }

    async fn start_one(
        service: Arc<dyn Service>,
        graph: &DependencyGraph,
        registry: &ServiceRegistry,
        ledger: &StopReasonLedger,
    ) {
        let label = service.label().clone();
        if let Err(err) = wait_for_dependencies(&label, service.kind(), graph, registry).await {
            warn!(%label, error = %err, "dependency barrier failed; marking waiting");
            if let Some(updater) = service.as_state_updater() {
                updater.update_state(ServiceState::Waiting, service.health(), Some(err.to_string()));
            }
            ledger.set(label, StopReason::Dependency).await;
            return;
        }

        if let Err(err) = service.start().await {
            warn!(%label, error = %err, "service failed to start");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::FakeService;
    use crate::types::HealthStatus;

    fn build_graph() -> DependencyGraph {
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
        graph
    }

    #[tokio::test]
    async fn barrier_passes_immediately_when_dependency_already_running() {
        let graph = build_graph();
        let registry = ServiceRegistry::new();
        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        cluster.start().await.unwrap();
        registry.register(cluster).await.unwrap();

        wait_for_dependencies(
            &ServiceLabel::new("mc-prom"),
            ServiceKind::PortForward,
            &graph,
            &registry,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn barrier_fails_fast_on_failed_dependency() {
        let graph = build_graph();
        let registry = ServiceRegistry::new();
        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        cluster.force_state(ServiceState::Failed, HealthStatus::Unhealthy);
        registry.register(cluster).await.unwrap();

        let err = wait_for_dependencies(
            &ServiceLabel::new("mc-prom"),
            ServiceKind::PortForward,
            &graph,
            &registry,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "dependency_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_times_out_when_dependency_never_becomes_running() {
        let graph = build_graph();
        let registry = ServiceRegistry::new();
        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        // Left in Starting: neither Running nor Failed.
        cluster.force_state(ServiceState::Starting, HealthStatus::Unknown);
        registry.register(cluster).await.unwrap();

        let barrier = wait_for_dependencies(
            &ServiceLabel::new("mc-prom"),
            ServiceKind::PortForward,
            &graph,
            &registry,
        );
        tokio::pin!(barrier);
        tokio::time::advance(Duration::from_secs(6)).await;
        let err = barrier.await.unwrap_err();
        assert_eq!(err.kind(), "dependency_timeout");
    }

    #[tokio::test]
    async fn start_all_respects_group_order() {
        let registry = Arc::new(ServiceRegistry::new());
        let ledger = Arc::new(StopReasonLedger::new());
        let graph = Arc::new(build_graph());

        let cluster = Arc::new(FakeService::new("mc-t", ServiceKind::KubeConnection, vec![]));
        let pf = Arc::new(FakeService::new("mc-prom", ServiceKind::PortForward, vec![NodeId::cluster("mc-t")]));
        let mcp = Arc::new(FakeService::new(
            "prometheus",
            ServiceKind::MCPServer,
            vec![NodeId::port_forward(&ServiceLabel::new("mc-prom"))],
        ));
        registry.register(cluster.clone()).await.unwrap();
        registry.register(pf.clone()).await.unwrap();
        registry.register(mcp.clone()).await.unwrap();

        StartScheduler::start_all(registry, graph, ledger).await;

        assert_eq!(cluster.state(), ServiceState::Running);
        assert_eq!(pf.state(), ServiceState::Running);
        assert_eq!(mcp.state(), ServiceState::Running);
    }

    #[tokio::test]
    async fn generic_instance_services_are_started_by_start_all() {
        let registry = Arc::new(ServiceRegistry::new());
        let ledger = Arc::new(StopReasonLedger::new());
        let graph = Arc::new(DependencyGraph::new());

        let svc = Arc::new(FakeService::new("sidecar", ServiceKind::GenericInstance, vec![]));
        registry.register(svc.clone()).await.unwrap();

        StartScheduler::start_all(registry, graph, ledger).await;

        assert_eq!(svc.state(), ServiceState::Running);
    }

    #[tokio::test]
    async fn manual_services_are_never_started() {
        let registry = Arc::new(ServiceRegistry::new());
        let ledger = Arc::new(StopReasonLedger::new());
        let graph = Arc::new(DependencyGraph::new());

        let svc = Arc::new(FakeService::new("mc-prom", ServiceKind::PortForward, vec![]));
        registry.register(svc.clone()).await.unwrap();
        ledger.set(ServiceLabel::new("mc-prom"), StopReason::Manual).await;

        StartScheduler::start_all(registry, graph, ledger).await;

        assert_eq!(svc.state(), ServiceState::Unknown);
    }
}
