//! The single source of truth for "should this service be auto-restarted?"

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::types::{ServiceLabel, StopReason};

/// Per-label stop reason. Absence of an entry is a distinct third state
/// ("no reason") — it must never be treated as `Dependency`.
#[derive(Default)]
pub struct StopReasonLedger {
    reasons: Mutex<HashMap<ServiceLabel, StopReason>>,
}

impl StopReasonLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `label` was stopped for `reason`, overwriting any prior entry.
    pub async fn set(&self, label: ServiceLabel, reason: StopReason) {
        self.reasons.lock().await.insert(label, reason);
    }

    /// Clear any entry for `label`. Called on a successful `Start`.
    pub async fn clear(&self, label: &ServiceLabel) {
        self.reasons.lock().await.remove(label);
    }

    /// Current reason, if any.
    pub async fn get(&self, label: &ServiceLabel) -> Option<StopReason> {
        self.reasons.lock().await.get(label).copied()
    }

    /// True only if the ledger explicitly holds `Dependency` for `label`.
    /// An absent entry, or `Manual`, both return false.
    pub async fn is_auto_restart_eligible(&self, label: &ServiceLabel) -> bool {
        matches!(self.get(label).await, Some(StopReason::Dependency))
    }

    /// True only if the ledger explicitly holds `Manual` for `label`.
    pub async fn is_manual(&self, label: &ServiceLabel) -> bool {
        matches!(self.get(label).await, Some(StopReason::Manual))
    }

    /// All labels currently marked with `reason` (a snapshot).
    pub async fn labels_with_reason(&self, reason: StopReason) -> Vec<ServiceLabel> {
        self.reasons
            .lock()
            .await
            .iter()
            .filter(|(_, r)| **r == reason)
            .map(|(label, _)| label.clone())
            .collect()
    }

    /// Drop every entry. Used by `Reconfigure`.
    pub async fn clear_all(&self) {
        self.reasons.lock().await.clear();
    }
}
