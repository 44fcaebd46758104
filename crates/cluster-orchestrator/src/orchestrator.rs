//! The facade: owns every core component and exposes the public API
//! surface a host application drives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cascade::{self, CascadeEngine};
use crate::cluster::{ClusterDefinition, ClusterRole, ClusterState};
use crate::config::{self, OrchestratorConfig};
use crate::error::{OrchestratorError, Result};
use crate::event_bus::{EventBus, StateChangeEvent};
use crate::graph::DependencyGraph;
use crate::health::HealthCheckLoop;
use crate::registry::ServiceRegistry;
use crate::scheduler::{self, StartScheduler};
use crate::service::Service;
use crate::stop_reason::StopReasonLedger;
use crate::types::{HealthStatus, ServiceKind, ServiceLabel, ServiceState, StopReason};

const MONITOR_TICK: Duration = Duration::from_secs(5);

/// Per-group shutdown deadlines, applied in the reverse of startup order.
/// Generic instances share a deadline with port-forwards: neither depends on
/// the other, matching their shared `startup_rank`.
const STOP_GROUPS: [(ServiceKind, Duration); 5] = [
    (ServiceKind::MCPServer, Duration::from_secs(3)),
    (ServiceKind::Aggregator, Duration::from_secs(2)),
    (ServiceKind::PortForward, Duration::from_secs(2)),
    (ServiceKind::GenericInstance, Duration::from_secs(2)),
    (ServiceKind::KubeConnection, Duration::from_secs(1)),
];

/// A point-in-time snapshot of one service, returned by the query methods.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub label: ServiceLabel,
    pub kind: ServiceKind,
    pub state: ServiceState,
    pub health: HealthStatus,
    pub error: Option<String>,
}

/// Owns the registry, DAG, stop-reason ledger, cluster state, event bus,
/// and root cancellation token; composes every other component behind a
/// small public surface. Every method is safe for concurrent invocation.
pub struct Orchestrator {
    registry: Arc<ServiceRegistry>,
    graph: RwLock<Arc<DependencyGraph>>,
    ledger: Arc<StopReasonLedger>,
    clusters: RwLock<ClusterState>,
    event_bus: Arc<EventBus>,
    health_loops: Arc<HealthCheckLoop>,
    config: RwLock<OrchestratorConfig>,
    cancellation: Mutex<CancellationToken>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Register a service the host has already constructed. The label must
    /// match the one produced by the configuration mapping for the node to
    /// pick up its dependency edges.
    pub async fn register(&self, service: Arc<dyn Service>) -> Result<()> {
        self.registry.register(service).await
    }

    pub async fn unregister(&self, label: &ServiceLabel) {
        self.registry.unregister(label).await;
    }

    /// Build the DAG from the current configuration, install state-change
    /// callbacks, run the start scheduler, and launch the monitor loop.
    pub async fn start(&self) -> Result<()> {
        let config = self.config.read().await.clone();
        let cluster_state = config::build_cluster_state(&config);
        let graph = config::build_dependency_graph(&config, &cluster_state);
        graph.validate()?;

        *self.clusters.write().await = cluster_state;
        let graph = Arc::new(graph);
        *self.graph.write().await = graph.clone();

        let token = CancellationToken::new();
        *self.cancellation.lock().await = token.clone();

        for service in self.registry.all().await {
            let event_bus = self.event_bus.clone();
            let kind = service.kind();
            service.set_state_change_callback(Arc::new(move |label, old_state, new_state, health, error| {
                event_bus.publish(StateChangeEvent {
                    label,
                    kind,
                    old_state,
                    new_state,
                    health,
                    error,
                    timestamp: Utc::now(),
                    correlation_id: cascade::current_correlation_id(),
                });
            }));
        }

        StartScheduler::start_all(self.registry.clone(), graph.clone(), self.ledger.clone()).await;

        let handle = tokio::spawn(run_monitor_loop(
            self.registry.clone(),
            graph,
            self.ledger.clone(),
            self.health_loops.clone(),
            token,
        ));
        *self.monitor_handle.lock().await = Some(handle);
        Ok(())
    }

    /// Cancel the root token, stop the monitor loop, then stop every
    /// service group-by-group in reverse startup order with an independent
    /// deadline per group; within a group, stops run concurrently. A
    /// deadline expiring logs a warning but never fails shutdown.
    pub async fn stop(&self) -> Result<()> {
        self.cancellation.lock().await.cancel();
        if let Some(handle) = self.monitor_handle.lock().await.take() {
            let _ = handle.await;
        }

        let services = self.registry.all().await;
        for (kind, deadline) in STOP_GROUPS {
            let group: Vec<_> = services.iter().filter(|s| s.kind() == kind).cloned().collect();
            if group.is_empty() {
                continue;
            }
            let mut handles = Vec::with_capacity(group.len());
            for service in group {
                handles.push(tokio::spawn(async move {
                    let label = service.label().clone();
                    match tokio::time::timeout(deadline, service.stop()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(%label, error = %err, "error stopping service"),
                        Err(_) => warn!(%label, "stop exceeded group shutdown deadline"),
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
        Ok(())
    }

    /// Clears `ledger[label]`, then starts it directly (bypassing the
    /// dependency barrier — a user-driven start is an explicit request).
    pub async fn start_service(&self, label: &ServiceLabel) -> Result<()> {
        let service = self.registry.get(label).await.ok_or_else(|| OrchestratorError::NotFound {
            label: label.to_string(),
        })?;
        self.ledger.clear(label).await;
        service.start().await
    }

    /// `ledger[label] = Manual`, then a reverse-topological stop cascade.
    pub async fn stop_service(&self, label: &ServiceLabel) -> Result<()> {
        let graph = self.graph.read().await.clone();
        CascadeEngine::stop_service(label, &graph, &self.registry, &self.ledger).await
    }

    /// Clears `ledger[label]`, then `Restart` (or `Start` if not active).
    pub async fn restart_service(&self, label: &ServiceLabel) -> Result<()> {
        CascadeEngine::restart_service(label, &self.registry, &self.ledger).await
    }

    pub async fn get_all_services(&self) -> Vec<ServiceStatus> {
        self.registry.all().await.iter().map(|s| status_of(s.as_ref())).collect()
    }

    pub async fn get_service_status(&self, label: &ServiceLabel) -> Result<ServiceStatus> {
        let service = self.registry.get(label).await.ok_or_else(|| OrchestratorError::NotFound {
            label: label.to_string(),
        })?;
        Ok(status_of(service.as_ref()))
    }

    /// Labels currently stopped for `reason` — e.g. every service a host
    /// dashboard should show as "waiting on a dependency" versus "stopped by
    /// an operator".
    pub async fn get_services_with_stop_reason(&self, reason: StopReason) -> Vec<ServiceLabel> {
        self.ledger.labels_with_reason(reason).await
    }

    pub fn subscribe_to_state_changes(&self) -> mpsc::Receiver<StateChangeEvent> {
        self.event_bus.subscribe()
    }

    pub async fn get_available_clusters(&self, role: ClusterRole) -> Vec<ClusterDefinition> {
        self.clusters.read().await.clusters_for_role(role)
    }

    pub async fn get_active_cluster(&self, role: ClusterRole) -> Option<String> {
        self.clusters.read().await.active_cluster(role).map(str::to_string)
    }

    pub async fn switch_cluster(&self, role: ClusterRole, name: &str) -> Result<()> {
        self.clusters.write().await.switch_cluster(role, name)
    }

    /// Stop everything, clear the ledger, adopt `new_config`, rebuild the
    /// graph, and start again. Does not unregister already-registered
    /// services — constructing the concrete replacements for a changed
    /// config is a host concern; register/unregister around this call to
    /// match.
    pub async fn reconfigure(&self, new_config: OrchestratorConfig) -> Result<()> {
        self.stop().await?;
        self.ledger.clear_all().await;
        *self.config.write().await = new_config;
        self.start().await
    }
}

fn status_of(service: &dyn Service) -> ServiceStatus {
    ServiceStatus {
        label: service.label().clone(),
        kind: service.kind(),
        state: service.state(),
        health: service.health(),
        error: service.last_error(),
    }
}

async fn run_monitor_loop(
    registry: Arc<ServiceRegistry>,
    graph: Arc<DependencyGraph>,
    ledger: Arc<StopReasonLedger>,
    health_loops: Arc<HealthCheckLoop>,
    cancellation: CancellationToken,
) {
    let mut last_states: HashMap<ServiceLabel, ServiceState> = HashMap::new();
    let mut ticker = tokio::time::interval(MONITOR_TICK);
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = ticker.tick() => {}
        }

        for service in registry.all().await {
            let label = service.label().clone();
            let state = service.state();
            let previous = last_states.insert(label.clone(), state);

            if previous != Some(ServiceState::Failed) && state == ServiceState::Failed {
                // Newly failed this tick, whether by its own fault or by a dependency
                // dying underneath it: cascade the stop to its dependents before
                // anything below gets a chance to retry it in the same tick.
                CascadeEngine::stop_with_dependents(&service, &graph, &registry, &ledger).await;
            } else if state == ServiceState::Failed && !ledger.is_manual(&label).await {
                // Already failed as of a prior tick: keep retrying once its
                // dependencies are ready.
                if scheduler::dependencies_ready(&label, service.kind(), &graph, &registry).await {
                    if let Err(err) = service.start().await {
                        warn!(%label, error = %err, "monitor retry failed to start service");
                    }
                }
            }

            if previous != Some(ServiceState::Running) && state == ServiceState::Running {
                CascadeEngine::on_dependency_became_running(&label, &graph, &registry, &ledger).await;
                health_loops.spawn_if_absent(service.clone(), cancellation.clone()).await;
            }
        }
    }
}

/// Fluent constructor for [`Orchestrator`], mirroring how host applications
/// assemble the facade without a long constructor argument list.
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            registry: Arc::new(ServiceRegistry::new()),
            graph: RwLock::new(Arc::new(DependencyGraph::new())),
            ledger: Arc::new(StopReasonLedger::new()),
            clusters: RwLock::new(ClusterState::default()),
            event_bus: Arc::new(EventBus::new()),
            health_loops: Arc::new(HealthCheckLoop::new()),
            config: RwLock::new(self.config),
            cancellation: Mutex::new(CancellationToken::new()),
            monitor_handle: Mutex::new(None),
        }
    }
}
