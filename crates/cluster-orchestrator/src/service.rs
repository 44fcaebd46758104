//! The `Service` contract, its optional capabilities, and the single
//! generic `ManagedService<E>` that implements it for every service kind.

use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};
use crate::types::{HealthStatus, NodeId, ServiceKind, ServiceLabel, ServiceState};

/// Invoked on every observed state transition with
/// `(label, old_state, new_state, health, last_error)`. Must not block
/// indefinitely — it runs on the transitioning task.
pub type StateChangeCallback =
    Arc<dyn Fn(ServiceLabel, ServiceState, ServiceState, HealthStatus, Option<String>) + Send + Sync>;

/// Optional capability: a service that can be actively probed for health.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check_health(&self) -> Result<HealthStatus>;
    fn health_check_interval(&self) -> Duration;
}

/// Optional capability: a service whose state can be forced externally,
/// used by the scheduler to mark a skipped service `Waiting`.
pub trait StateUpdater: Send + Sync {
    fn update_state(&self, state: ServiceState, health: HealthStatus, error: Option<String>);
}

/// The contract every managed service satisfies, independent of kind.
#[async_trait]
pub trait Service: Send + Sync {
    fn label(&self) -> &ServiceLabel;
    fn kind(&self) -> ServiceKind;
    fn state(&self) -> ServiceState;
    fn health(&self) -> HealthStatus;
    fn last_error(&self) -> Option<String>;

    /// Declared dependencies, as DAG node ids. Used when a host builds its
    /// own graph directly from already-constructed services rather than
    /// from configuration (most callers use the config mapping instead).
    fn dependencies(&self) -> &[NodeId];

    /// Stopped/Failed/Waiting → Starting → Running (or Failed). Idempotent
    /// on an already-`Running` service.
    async fn start(&self) -> Result<()>;

    /// Any non-terminal state → Stopped. Idempotent on `Stopped`.
    async fn stop(&self) -> Result<()>;

    /// Stop then start; the intermediate `Stopped` is always observed by
    /// the callback.
    async fn restart(&self) -> Result<()>;

    fn set_state_change_callback(&self, callback: StateChangeCallback);

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        None
    }

    fn as_state_updater(&self) -> Option<&dyn StateUpdater> {
        None
    }
}

/// The out-of-scope collaborator that does the real work for one service
/// kind: shelling out to a cluster CLI, running a port-forward tunnel,
/// managing an MCP subprocess, and so on. The core never implements this —
/// only the trait and the generic wrapper around it.
#[async_trait]
pub trait ServiceExecutor: Send + Sync + 'static {
    async fn start(&self) -> std::result::Result<(), String>;
    async fn stop(&self) -> std::result::Result<(), String>;

    /// Probe current health. Only called when `supports_health_check` is true.
    async fn check_health(&self) -> std::result::Result<HealthStatus, String> {
        Ok(HealthStatus::Unknown)
    }

    fn supports_health_check(&self) -> bool {
        false
    }

    fn health_check_interval(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Implements [`Service`] for any [`ServiceExecutor`] by owning the common
/// state-machine bookkeeping (state/health/last-error, callback dispatch,
/// start/stop idempotency) and delegating the kind-specific work to `E`.
/// This is the "interface-plus-tag" shape: one type, tagged by `kind`,
/// instead of five hand-written structs.
pub struct ManagedService<E: ServiceExecutor> {
    label: ServiceLabel,
    kind: ServiceKind,
    depends_on: Vec<NodeId>,
    executor: E,
    state: StdRwLock<ServiceState>,
    health: StdRwLock<HealthStatus>,
    last_error: StdRwLock<Option<String>>,
    callback: StdMutex<Option<StateChangeCallback>>,
}

impl<E: ServiceExecutor> ManagedService<E> {
    pub fn new(label: impl Into<ServiceLabel>, kind: ServiceKind, depends_on: Vec<NodeId>, executor: E) -> Self {
        Self {
            label: label.into(),
            kind,
            depends_on,
            executor,
            state: StdRwLock::new(ServiceState::Unknown),
            health: StdRwLock::new(HealthStatus::Unknown),
            last_error: StdRwLock::new(None),
            callback: StdMutex::new(None),
        }
    }

    fn set_state(&self, new_state: ServiceState, health: HealthStatus, error: Option<String>) {
        let old_state = {
            let mut state = self.state.write().expect("state lock poisoned");
            std::mem::replace(&mut *state, new_state)
        };
        *self.health.write().expect("health lock poisoned") = health;
        *self.last_error.write().expect("last_error lock poisoned") = error.clone();

        let callback = self.callback.lock().expect("callback lock poisoned").clone();
        if let Some(callback) = callback {
            callback(self.label.clone(), old_state, new_state, health, error);
        }
    }
}

#[async_trait]
impl<E: ServiceExecutor> Service for ManagedService<E> {
    fn label(&self) -> &ServiceLabel {
        &self.label
    }

    fn kind(&self) -> ServiceKind {
        self.kind
    }

    fn state(&self) -> ServiceState {
        *self.state.read().expect("state lock poisoned")
    }

    fn health(&self) -> HealthStatus {
        *self.health.read().expect("health lock poisoned")
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.read().expect("last_error lock poisoned").clone()
    }

    fn dependencies(&self) -> &[NodeId] {
        &self.depends_on
    }

    async fn start(&self) -> Result<()> {
        if self.state() == ServiceState::Running {
            return Ok(());
        }
        self.set_state(ServiceState::Starting, self.health(), None);
        match self.executor.start().await {
            Ok(()) => {
                self.set_state(ServiceState::Running, self.health(), None);
                Ok(())
            }
            Err(message) => {
                self.set_state(ServiceState::Failed, HealthStatus::Unhealthy, Some(message.clone()));
                Err(OrchestratorError::ServiceStartFailed {
                    label: self.label.to_string(),
                    message,
                })
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        if self.state() == ServiceState::Stopped {
            return Ok(());
        }
        match self.executor.stop().await {
            Ok(()) => {
                self.set_state(ServiceState::Stopped, self.health(), None);
                Ok(())
            }
            Err(message) => {
                self.set_state(ServiceState::Failed, self.health(), Some(message.clone()));
                Err(OrchestratorError::ServiceStopFailed {
                    label: self.label.to_string(),
                    message,
                })
            }
        }
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    fn set_state_change_callback(&self, callback: StateChangeCallback) {
        *self.callback.lock().expect("callback lock poisoned") = Some(callback);
    }

    fn as_health_checker(&self) -> Option<&dyn HealthChecker> {
        if self.executor.supports_health_check() {
            Some(self)
        } else {
            None
        }
    }

    fn as_state_updater(&self) -> Option<&dyn StateUpdater> {
        Some(self)
    }
}

#[async_trait]
impl<E: ServiceExecutor> HealthChecker for ManagedService<E> {
    async fn check_health(&self) -> Result<HealthStatus> {
        self.executor
            .check_health()
            .await
            .map_err(|message| OrchestratorError::HealthCheckFailed {
                label: self.label.to_string(),
                message,
            })
    }

    fn health_check_interval(&self) -> Duration {
        self.executor.health_check_interval()
    }
}

impl<E: ServiceExecutor> StateUpdater for ManagedService<E> {
    fn update_state(&self, state: ServiceState, health: HealthStatus, error: Option<String>) {
        self.set_state(state, health, error);
    }
}
