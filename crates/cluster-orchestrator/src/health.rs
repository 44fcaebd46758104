//! Per-service health probing, started once a service reaches `Running`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::Service;
use crate::types::{HealthStatus, ServiceLabel, ServiceState};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ensures exactly one health-check loop runs per label at a time. Spawning
/// is idempotent: a second call for an already-looping label is a no-op.
#[derive(Default)]
pub struct HealthCheckLoop {
    active: Mutex<HashSet<ServiceLabel>>,
}

impl HealthCheckLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_active(&self, label: &ServiceLabel) -> bool {
        self.active.lock().await.contains(label)
    }

    /// Spawn a loop for `service` if it exposes the `HealthChecker`
    /// capability and no loop is already running for its label.
    pub async fn spawn_if_absent(
        self: &Arc<Self>,
        service: Arc<dyn Service>,
        cancellation: CancellationToken,
    ) {
        if service.as_health_checker().is_none() {
            return;
        }
        let label = service.label().clone();
        {
            let mut active = self.active.lock().await;
            if active.contains(&label) {
                return;
            }
            active.insert(label.clone());
        }

        let this = self.clone();
        let loop_label = label.clone();
        tokio::spawn(async move {
            this.run(service, cancellation).await;
            this.active.lock().await.remove(&loop_label);
        });
    }

    async fn run(&self, service: Arc<dyn Service>, cancellation: CancellationToken) {
        let Some(checker) = service.as_health_checker() else {
            return;
        };
        let label = service.label().clone();

        Self::probe_once(service.as_ref(), &label).await;

        let period = checker.health_check_interval();
        let mut ticker = interval(period);
        ticker.tick().await; // consume the immediate first tick; we already probed above

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    debug!(%label, "health loop exiting: cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if service.state() != ServiceState::Running {
                        debug!(%label, "health loop exiting: service no longer running");
                        return;
                    }
                    Self::probe_once(service.as_ref(), &label).await;
                }
            }
        }
    }

    async fn probe_once(service: &dyn Service, label: &ServiceLabel) {
        let Some(checker) = service.as_health_checker() else {
            return;
        };
        let outcome = timeout(PROBE_TIMEOUT, checker.check_health()).await;
        let (health, error) = match outcome {
            Ok(Ok(status)) => (status, None),
            Ok(Err(err)) => {
                warn!(%label, error = %err, "health probe failed");
                (HealthStatus::Unhealthy, Some(err.to_string()))
            }
            Err(_) => {
                warn!(%label, "health probe timed out");
                (HealthStatus::Unhealthy, Some("health probe timed out".to_string()))
            }
        };
        if let Some(updater) = service.as_state_updater() {
            updater.update_state(service.state(), health, error);
        }
    }
}
