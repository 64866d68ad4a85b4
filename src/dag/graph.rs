// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::task::Task;
use crate::dag::TaskName;
use crate::errors::DagError;

/// Adjacency for one task: immediate upstreams and downstreams, kept
/// sorted for deterministic iteration.
#[derive(Debug, Clone, Default)]
struct DagNode {
    upstream: Vec<TaskName>,
    downstream: Vec<TaskName>,
}

/// Explicit builder for a [`Dag`].
///
/// Tasks and edges are collected first; all validation happens in
/// [`DagBuilder::build`], so a failed build never yields a partial DAG.
///
/// ```rust,ignore
/// let dag = DagBuilder::new("etl")
///     .add_task(ingest)
///     .add_task(clean)
///     .add_edge("ingest", "clean")
///     .build()?;
/// ```
pub struct DagBuilder {
    name: String,
    tasks: Vec<Task>,
    edges: Vec<(TaskName, TaskName)>,
}

impl DagBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// Declare that `from` must complete successfully before `to` may start.
    pub fn add_edge(mut self, from: impl Into<TaskName>, to: impl Into<TaskName>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validate and freeze the DAG.
    ///
    /// Checks, in order: at least one task, no duplicate task names, every
    /// edge endpoint exists, no self-edges, and acyclicity (the cycle error
    /// names one task on a cycle).
    pub fn build(self) -> Result<Dag, DagError> {
        if self.tasks.is_empty() {
            return Err(DagError::Empty(self.name));
        }

        let mut tasks: BTreeMap<TaskName, Task> = BTreeMap::new();
        for task in self.tasks {
            let name = task.name().to_string();
            if tasks.insert(name.clone(), task).is_some() {
                return Err(DagError::DuplicateTask(name));
            }
        }

        let mut nodes: BTreeMap<TaskName, DagNode> = tasks
            .keys()
            .map(|name| (name.clone(), DagNode::default()))
            .collect();

        // Deduplicate edges so a repeated add_edge is harmless.
        let mut edge_set: BTreeSet<(TaskName, TaskName)> = BTreeSet::new();
        for (from, to) in self.edges {
            for endpoint in [&from, &to] {
                if !tasks.contains_key(endpoint) {
                    return Err(DagError::UnknownTask {
                        from: from.clone(),
                        to: to.clone(),
                        unknown: endpoint.clone(),
                    });
                }
            }
            if from == to {
                return Err(DagError::SelfDependency(from));
            }
            edge_set.insert((from, to));
        }

        for (from, to) in &edge_set {
            nodes
                .get_mut(to)
                .map(|n| n.upstream.push(from.clone()));
            nodes
                .get_mut(from)
                .map(|n| n.downstream.push(to.clone()));
        }

        // Cycle check via petgraph; the toposort error names a node that
        // participates in a cycle.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in tasks.keys() {
            graph.add_node(name.as_str());
        }
        for (from, to) in &edge_set {
            graph.add_edge(from.as_str(), to.as_str(), ());
        }
        if let Err(cycle) = toposort(&graph, None) {
            return Err(DagError::Cycle {
                task: cycle.node_id().to_string(),
            });
        }

        let topo = deterministic_topo_order(&nodes);

        Ok(Dag {
            name: self.name,
            tasks,
            nodes,
            topo,
        })
    }
}

/// Kahn's algorithm with the ready set kept in a `BTreeSet`, so ties are
/// always broken by task name ascending. Callers have already ruled out
/// cycles.
fn deterministic_topo_order(nodes: &BTreeMap<TaskName, DagNode>) -> Vec<TaskName> {
    let mut in_degree: BTreeMap<&str, usize> = nodes
        .iter()
        .map(|(name, node)| (name.as_str(), node.upstream.len()))
        .collect();

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(name) = ready.pop_first() {
        order.push(name.to_string());
        for downstream in &nodes[name].downstream {
            if let Some(deg) = in_degree.get_mut(downstream.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(downstream.as_str());
                }
            }
        }
    }

    order
}

/// An immutable, validated DAG of named tasks.
///
/// Built once via [`DagBuilder`] and treated as read-only afterwards; it is
/// safe to share across concurrent readers (typically as an `Arc<Dag>`).
#[derive(Debug)]
pub struct Dag {
    name: String,
    tasks: BTreeMap<TaskName, Task>,
    nodes: BTreeMap<TaskName, DagNode>,
    topo: Vec<TaskName>,
}

impl Dag {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// All task names, ascending.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    /// Immediate upstream dependencies of a task.
    pub fn upstream_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.upstream.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate downstream dependents of a task.
    pub fn downstream_of(&self, name: &str) -> &[TaskName] {
        self.nodes
            .get(name)
            .map(|n| n.downstream.as_slice())
            .unwrap_or(&[])
    }

    /// A deterministic linearization consistent with every edge; ties are
    /// broken by task name ascending.
    pub fn topological_order(&self) -> &[TaskName] {
        &self.topo
    }

    /// Tasks with no upstream dependencies.
    pub fn roots(&self) -> Vec<TaskName> {
        self.tasks
            .keys()
            .filter(|name| self.upstream_of(name).is_empty())
            .cloned()
            .collect()
    }

    /// Tasks with no downstream dependents.
    pub fn leaves(&self) -> Vec<TaskName> {
        self.tasks
            .keys()
            .filter(|name| self.downstream_of(name).is_empty())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutionError;

    fn noop_task(name: &str) -> Task {
        Task::from_fn(name, |_ctx| async { Ok(serde_json::Value::Null) })
    }

    fn diamond() -> Dag {
        DagBuilder::new("diamond")
            .add_task(noop_task("a"))
            .add_task(noop_task("b"))
            .add_task(noop_task("c"))
            .add_task(noop_task("d"))
            .add_edge("a", "b")
            .add_edge("a", "c")
            .add_edge("b", "d")
            .add_edge("c", "d")
            .build()
            .expect("diamond DAG is valid")
    }

    #[test]
    fn build_rejects_empty_dag() {
        let err = DagBuilder::new("empty").build().unwrap_err();
        assert!(matches!(err, DagError::Empty(_)));
    }

    #[test]
    fn build_rejects_duplicate_task() {
        let err = DagBuilder::new("dup")
            .add_task(noop_task("a"))
            .add_task(noop_task("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, DagError::DuplicateTask(name) if name == "a"));
    }

    #[test]
    fn build_rejects_unknown_edge_endpoint() {
        let err = DagBuilder::new("unknown")
            .add_task(noop_task("a"))
            .add_edge("a", "ghost")
            .build()
            .unwrap_err();
        assert!(matches!(err, DagError::UnknownTask { unknown, .. } if unknown == "ghost"));
    }

    #[test]
    fn build_rejects_self_dependency() {
        let err = DagBuilder::new("selfdep")
            .add_task(noop_task("a"))
            .add_edge("a", "a")
            .build()
            .unwrap_err();
        assert!(matches!(err, DagError::SelfDependency(name) if name == "a"));
    }

    #[test]
    fn build_rejects_cycle_and_names_a_task_on_it() {
        let err = DagBuilder::new("cyclic")
            .add_task(noop_task("a"))
            .add_task(noop_task("b"))
            .add_task(noop_task("c"))
            .add_edge("a", "b")
            .add_edge("b", "c")
            .add_edge("c", "a")
            .build()
            .unwrap_err();

        match err {
            DagError::Cycle { task } => {
                assert!(["a", "b", "c"].contains(&task.as_str()));
            }
            other => panic!("expected Cycle error, got {other:?}"),
        }
    }

    #[test]
    fn topological_order_respects_edges_and_breaks_ties_by_name() {
        let dag = diamond();
        assert_eq!(dag.topological_order(), &["a", "b", "c", "d"]);

        let pos = |name: &str| {
            dag.topological_order()
                .iter()
                .position(|t| t == name)
                .unwrap()
        };
        for name in dag.task_names() {
            for up in dag.upstream_of(name) {
                assert!(pos(up) < pos(name), "{up} must precede {name}");
            }
        }
    }

    #[test]
    fn adjacency_roots_and_leaves() {
        let dag = diamond();
        assert_eq!(dag.upstream_of("d"), &["b", "c"]);
        assert_eq!(dag.downstream_of("a"), &["b", "c"]);
        assert_eq!(dag.roots(), vec!["a".to_string()]);
        assert_eq!(dag.leaves(), vec!["d".to_string()]);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let dag = DagBuilder::new("dedup")
            .add_task(noop_task("a"))
            .add_task(noop_task("b"))
            .add_edge("a", "b")
            .add_edge("a", "b")
            .build()
            .unwrap();
        assert_eq!(dag.upstream_of("b"), &["a"]);
    }

    #[test]
    fn failing_handler_is_allowed_at_build_time() {
        // Build-time validation is structural only; handlers are opaque.
        let dag = DagBuilder::new("one")
            .add_task(Task::from_fn("boom", |_ctx| async {
                Err(ExecutionError::msg("always fails"))
            }))
            .build()
            .unwrap();
        assert!(dag.contains("boom"));
    }
}
