//! A labeled dependency DAG over [`NodeId`]s.

use std::collections::{HashMap, HashSet};

use crate::error::{OrchestratorError, Result};
use crate::types::{NodeId, ServiceKind};

/// One node in the dependency graph: a service's identity plus its declared
/// forward edges (the nodes it depends on).
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub id: NodeId,
    pub kind: ServiceKind,
    pub display_name: String,
    pub depends_on: Vec<NodeId>,
}

/// Forward edges plus a derived reverse index. Rebuilt wholesale on every
/// `Reconfigure`; read-only between rebuilds.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<NodeId, DependencyNode>,
    dependents: HashMap<NodeId, Vec<NodeId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node. `depends_on` may reference nodes not yet
    /// added — forward declarations are resolved once the whole graph is
    /// built and [`validate`](Self::validate) is called.
    pub fn add_node(&mut self, id: NodeId, kind: ServiceKind, display_name: String, depends_on: Vec<NodeId>) {
        // Drop this node's old reverse edges before re-inserting, in case
        // `add_node` is replacing an existing node with different deps.
        if let Some(old) = self.nodes.get(&id) {
            for dep in &old.depends_on {
                if let Some(list) = self.dependents.get_mut(dep) {
                    list.retain(|d| d != &id);
                }
            }
        }
        for dep in &depends_on {
            self.dependents.entry(dep.clone()).or_default().push(id.clone());
        }
        self.nodes.insert(
            id.clone(),
            DependencyNode {
                id,
                kind,
                display_name,
                depends_on,
            },
        );
    }

    pub fn get(&self, id: &NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    pub fn dependencies(&self, id: &NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|n| n.depends_on.clone())
            .unwrap_or_default()
    }

    pub fn dependents(&self, id: &NodeId) -> Vec<NodeId> {
        self.dependents.get(id).cloned().unwrap_or_default()
    }

    /// All nodes transitively depending on `id` (reverse-reachable set,
    /// excluding `id` itself), ordered reverse-topologically so callers may
    /// iterate the result front-to-back to stop deepest dependents first.
    pub fn transitive_dependents(&self, id: &NodeId) -> Vec<NodeId> {
        // Collect the reachable set with BFS, then emit it in an order
        // consistent with reverse topological order via a second pass that
        // repeatedly peels nodes whose dependents (within the set) are
        // already emitted.
        let mut reachable: HashSet<NodeId> = HashSet::new();
        let mut queue: Vec<NodeId> = self.dependents(id);
        while let Some(next) = queue.pop() {
            if reachable.insert(next.clone()) {
                queue.extend(self.dependents(&next));
            }
        }

        let mut remaining: HashSet<NodeId> = reachable.clone();
        let mut ordered = Vec::with_capacity(reachable.len());
        while !remaining.is_empty() {
            let ready: Vec<NodeId> = remaining
                .iter()
                .filter(|n| {
                    self.dependents(n)
                        .iter()
                        .all(|d| !remaining.contains(d))
                })
                .cloned()
                .collect();
            if ready.is_empty() {
                // Residual cycle among dependents; emit what's left in
                // arbitrary but deterministic order rather than looping forever.
                let mut rest: Vec<NodeId> = remaining.iter().cloned().collect();
                rest.sort();
                ordered.extend(rest);
                break;
            }
            let mut ready = ready;
            ready.sort();
            for n in &ready {
                remaining.remove(n);
            }
            ordered.extend(ready);
        }
        ordered
    }

    /// Reject the graph if its edges contain a cycle, naming one node on it.
    ///
    /// Iterative DFS (no recursion, so depth can't stack-overflow on a large
    /// graph): a node is `Visiting` while still on the current path and
    /// `Done` once all of its dependencies have cleared. Encountering a
    /// `Visiting` node again means a back edge — a cycle — and that node is
    /// reported as the witness.
    pub fn validate(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        let mut marks: HashMap<NodeId, Mark> = HashMap::new();

        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();

        for start in ids {
            if marks.contains_key(start) {
                continue;
            }
            // Stack of (node, next-dependency-index-to-visit).
            let mut stack: Vec<(NodeId, usize)> = vec![(start.clone(), 0)];
            marks.insert(start.clone(), Mark::Visiting);

            while let Some((node, next_idx)) = stack.pop() {
                let deps = self.dependencies(&node);
                if let Some(dep) = deps.get(next_idx) {
                    stack.push((node.clone(), next_idx + 1));
                    match marks.get(dep) {
                        Some(Mark::Done) => {}
                        Some(Mark::Visiting) => {
                            return Err(OrchestratorError::CycleDetected {
                                witness: dep.to_string(),
                            });
                        }
                        None => {
                            marks.insert(dep.clone(), Mark::Visiting);
                            stack.push((dep.clone(), 0));
                        }
                    }
                } else {
                    marks.insert(node, Mark::Done);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::cluster(s)
    }

    #[test]
    fn dependents_are_derived_from_depends_on() {
        let mut g = DependencyGraph::new();
        g.add_node(id("a"), ServiceKind::KubeConnection, "a".into(), vec![]);
        g.add_node(id("b"), ServiceKind::PortForward, "b".into(), vec![id("a")]);
        assert_eq!(g.dependents(&id("a")), vec![id("b")]);
        assert_eq!(g.dependencies(&id("b")), vec![id("a")]);
    }

    #[test]
    fn transitive_dependents_excludes_self_and_covers_whole_chain() {
        let mut g = DependencyGraph::new();
        g.add_node(id("a"), ServiceKind::KubeConnection, "a".into(), vec![]);
        g.add_node(id("b"), ServiceKind::PortForward, "b".into(), vec![id("a")]);
        g.add_node(id("c"), ServiceKind::MCPServer, "c".into(), vec![id("b")]);
        let deps = g.transitive_dependents(&id("a"));
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&id("b")));
        assert!(deps.contains(&id("c")));
        assert!(!deps.contains(&id("a")));
    }

    #[test]
    fn forward_declared_dependency_is_fine_before_validate() {
        let mut g = DependencyGraph::new();
        g.add_node(id("b"), ServiceKind::PortForward, "b".into(), vec![id("a")]);
        g.add_node(id("a"), ServiceKind::KubeConnection, "a".into(), vec![]);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn cycle_is_rejected_with_a_witness() {
        let mut g = DependencyGraph::new();
        g.add_node(id("a"), ServiceKind::PortForward, "a".into(), vec![id("b")]);
        g.add_node(id("b"), ServiceKind::PortForward, "b".into(), vec![id("a")]);
        let err = g.validate().unwrap_err();
        assert_eq!(err.kind(), "cycle_detected");
    }
}
