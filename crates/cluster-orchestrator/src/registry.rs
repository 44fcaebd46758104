//! Label → service map with atomic register/unregister/lookup.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{OrchestratorError, Result};
use crate::service::Service;
use crate::types::ServiceLabel;

/// Registered services, keyed by their unique label. Guarded by a single
/// reader-writer lock; [`all`](Self::all) returns a snapshot so callers may
/// spawn tasks against it without holding the lock.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<ServiceLabel, Arc<dyn Service>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under its own label. Fails with `DuplicateLabel`
    /// if the label is already taken.
    pub async fn register(&self, service: Arc<dyn Service>) -> Result<()> {
        let label = service.label().clone();
        let mut services = self.services.write().await;
        if services.contains_key(&label) {
            return Err(OrchestratorError::DuplicateLabel {
                label: label.to_string(),
            });
        }
        services.insert(label, service);
        Ok(())
    }

    /// Remove a service, returning it if present.
    pub async fn unregister(&self, label: &ServiceLabel) -> Option<Arc<dyn Service>> {
        self.services.write().await.remove(label)
    }

    /// Look a service up by label.
    pub async fn get(&self, label: &ServiceLabel) -> Option<Arc<dyn Service>> {
        self.services.read().await.get(label).cloned()
    }

    /// A snapshot of every registered service.
    pub async fn all(&self) -> Vec<Arc<dyn Service>> {
        self.services.read().await.values().cloned().collect()
    }

    /// Remove every registered service. `Reconfigure` does not call this
    /// itself — replacing the registered set to match a new configuration
    /// is a host concern — but a host driving its own teardown may want it.
    pub async fn clear(&self) {
        self.services.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
