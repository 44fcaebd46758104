//! Cluster definitions and the active-cluster-per-role index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Functional role a cluster plays. Port-forwards and MCP servers may
/// reference a cluster by role instead of by name, letting the active
/// cluster for that role change without touching every dependent's config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterRole {
    Observability,
    Target,
    Management,
    Workload,
}

/// A read-only (after load) description of one reachable cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDefinition {
    pub name: String,
    /// Legacy kube-context string, matched only when neither name nor role resolve.
    pub context: String,
    pub role: ClusterRole,
    pub display_name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Role → active cluster name, plus the indices needed to resolve and
/// validate references. Mutated only by [`ClusterState::switch_cluster`].
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    active_by_role: HashMap<ClusterRole, String>,
    by_name: HashMap<String, ClusterDefinition>,
    by_role: HashMap<ClusterRole, Vec<String>>,
}

impl ClusterState {
    /// Build cluster state from a flat list of definitions. The first
    /// definition seen for a role becomes that role's active cluster.
    pub fn new(defs: Vec<ClusterDefinition>) -> Self {
        let mut state = ClusterState::default();
        for def in defs {
            state
                .active_by_role
                .entry(def.role)
                .or_insert_with(|| def.name.clone());
            state
                .by_role
                .entry(def.role)
                .or_default()
                .push(def.name.clone());
            state.by_name.insert(def.name.clone(), def);
        }
        state
    }

    /// All clusters declared for a role, in load order.
    pub fn clusters_for_role(&self, role: ClusterRole) -> Vec<ClusterDefinition> {
        self.by_role
            .get(&role)
            .into_iter()
            .flatten()
            .filter_map(|name| self.by_name.get(name))
            .cloned()
            .collect()
    }

    /// The currently active cluster name for a role, if any cluster of that role exists.
    pub fn active_cluster(&self, role: ClusterRole) -> Option<&str> {
        self.active_by_role.get(&role).map(String::as_str)
    }

    /// Look a cluster definition up by name.
    pub fn by_name(&self, name: &str) -> Option<&ClusterDefinition> {
        self.by_name.get(name)
    }

    /// Find a cluster by its legacy context string. Used only as a last resort.
    pub fn by_context(&self, context: &str) -> Option<&ClusterDefinition> {
        self.by_name.values().find(|def| def.context == context)
    }

    /// Switch the active cluster for `role` to `name`. Fails with
    /// `UnknownCluster` if no cluster named `name` exists for that role,
    /// preserving the `activeClusters[role] ⊆ clustersByName` invariant.
    pub fn switch_cluster(&mut self, role: ClusterRole, name: &str) -> Result<()> {
        let exists = self
            .by_role
            .get(&role)
            .is_some_and(|names| names.iter().any(|n| n == name));
        if !exists {
            return Err(OrchestratorError::UnknownCluster {
                role,
                name: name.to_string(),
            });
        }
        self.active_by_role.insert(role, name.to_string());
        Ok(())
    }

    /// Resolve a port-forward/MCP reference to a concrete cluster name.
    /// Priority: explicit name > role (active cluster) > legacy context string.
    pub fn resolve(
        &self,
        explicit_name: Option<&str>,
        role: Option<ClusterRole>,
        legacy_context: Option<&str>,
    ) -> Option<String> {
        if let Some(name) = explicit_name {
            if self.by_name.contains_key(name) {
                return Some(name.to_string());
            }
        }
        if let Some(role) = role {
            if let Some(name) = self.active_cluster(role) {
                return Some(name.to_string());
            }
        }
        if let Some(context) = legacy_context {
            if let Some(def) = self.by_context(context) {
                return Some(def.name.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, role: ClusterRole) -> ClusterDefinition {
        ClusterDefinition {
            name: name.to_string(),
            context: format!("ctx-{name}"),
            role,
            display_name: name.to_string(),
            icon: None,
        }
    }

    #[test]
    fn first_cluster_per_role_becomes_active() {
        let state = ClusterState::new(vec![
            def("mc-t", ClusterRole::Observability),
            def("mc-t2", ClusterRole::Observability),
        ]);
        assert_eq!(state.active_cluster(ClusterRole::Observability), Some("mc-t"));
    }

    #[test]
    fn switch_cluster_rejects_unknown_name() {
        let mut state = ClusterState::new(vec![def("mc-t", ClusterRole::Observability)]);
        let err = state
            .switch_cluster(ClusterRole::Observability, "nope")
            .unwrap_err();
        assert_eq!(err.kind(), "unknown_cluster");
        assert_eq!(state.active_cluster(ClusterRole::Observability), Some("mc-t"));
    }

    #[test]
    fn switch_cluster_updates_active_name() {
        let mut state = ClusterState::new(vec![
            def("mc-t", ClusterRole::Observability),
            def("mc-t2", ClusterRole::Observability),
        ]);
        state
            .switch_cluster(ClusterRole::Observability, "mc-t2")
            .unwrap();
        assert_eq!(state.active_cluster(ClusterRole::Observability), Some("mc-t2"));
    }

    #[test]
    fn resolve_prefers_explicit_name_over_role_over_context() {
        let state = ClusterState::new(vec![
            def("mc-t", ClusterRole::Observability),
            def("mc-other", ClusterRole::Target),
        ]);
        assert_eq!(
            state.resolve(Some("mc-other"), Some(ClusterRole::Observability), None),
            Some("mc-other".to_string())
        );
        assert_eq!(
            state.resolve(None, Some(ClusterRole::Observability), None),
            Some("mc-t".to_string())
        );
        assert_eq!(
            state.resolve(None, None, Some("ctx-mc-t")),
            Some("mc-t".to_string())
        );
        assert_eq!(state.resolve(None, None, None), None);
    }
}
