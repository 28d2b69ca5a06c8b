//! Dependency graph builder, cycle detection, and closure/wave computation.
//!
//! Atoms are modelled as a `petgraph` directed graph with an edge from each
//! dependency to its dependent. The topological order comes from a
//! three-colour depth-first traversal (unvisited / in progress / done) that
//! visits roots in registration order and dependencies in declared order, so
//! the order is deterministic for a fixed registration and a back edge yields
//! the offending path.

use std::collections::{HashMap, HashSet};

use atomflow_types::error::EngineError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use super::registry::{AtomDefinition, AtomRegistry};

/// Read-only, validated view of the dependency relation.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    /// Topological order.
    order: Vec<String>,
    /// Position of each atom in `order`.
    position: HashMap<String, usize>,
    /// Declared dependencies, deduplicated, in declared order.
    dependencies: HashMap<String, Vec<String>>,
    /// Dependents in registration order.
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Validate the registry and build the graph.
    ///
    /// Fails with `UnknownDependency` for an unresolved dependency name and
    /// with `CycleDetected` (carrying the cycle path) for a cyclic relation.
    pub fn build(registry: &AtomRegistry) -> Result<Self, EngineError> {
        for atom in registry.iter() {
            for dep in atom.dependencies() {
                if !registry.contains(dep) {
                    return Err(EngineError::UnknownDependency {
                        atom: atom.name().to_string(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let order = topological_order(registry)?;

        // Build directed graph: edge from dependency -> dependent
        let mut graph = DiGraph::<String, ()>::with_capacity(registry.len(), 0);
        let mut nodes = HashMap::with_capacity(registry.len());
        for name in registry.names() {
            nodes.insert(name.to_string(), graph.add_node(name.to_string()));
        }

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = registry
            .names()
            .map(|name| (name.to_string(), Vec::new()))
            .collect();

        for atom in registry.iter() {
            let mut seen = HashSet::new();
            let mut deps = Vec::with_capacity(atom.dependencies().len());
            for dep in atom.dependencies() {
                if !seen.insert(dep.as_str()) {
                    continue;
                }
                graph.add_edge(nodes[dep.as_str()], nodes[atom.name()], ());
                deps.push(dep.clone());
                if let Some(list) = dependents.get_mut(dep.as_str()) {
                    list.push(atom.name().to_string());
                }
            }
            dependencies.insert(atom.name().to_string(), deps);
        }

        let position = order
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        tracing::debug!(atoms = order.len(), order = ?order, "built dependency graph");

        Ok(Self {
            graph,
            nodes,
            order,
            position,
            dependencies,
            dependents,
        })
    }

    /// Atoms in topological order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Position of an atom in the topological order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.position.get(name).copied()
    }

    /// Distinct direct dependencies of `name`, in declared order.
    pub fn dependencies(&self, name: &str) -> &[String] {
        self.dependencies
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Direct dependents of `name`, in registration order.
    pub fn dependents(&self, name: &str) -> &[String] {
        self.dependents
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The given atoms plus every atom transitively depending on any of them,
    /// in topological order. Unknown names are ignored.
    pub fn downstream_closure<'a, I>(&self, roots: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut dfs = Dfs::empty(&self.graph);
        let mut reached = HashSet::new();
        for root in roots {
            let Some(&start) = self.nodes.get(root) else {
                continue;
            };
            dfs.move_to(start);
            while let Some(node) = dfs.next(&self.graph) {
                reached.insert(self.graph[node].as_str());
            }
        }
        self.in_order(&reached)
    }

    /// Every atom `name` transitively depends on (excluding itself), in
    /// topological order. Empty for unknown names.
    pub fn upstream_closure(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.nodes.get(name) else {
            return Vec::new();
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut reached = HashSet::new();
        while let Some(node) = dfs.next(reversed) {
            if node != start {
                reached.insert(self.graph[node].as_str());
            }
        }
        self.in_order(&reached)
    }

    /// Group atoms into parallel layers: every atom in a wave depends only on
    /// atoms in earlier waves. Each wave lists atoms in topological order.
    pub fn waves(&self) -> Vec<Vec<String>> {
        if self.order.is_empty() {
            return vec![];
        }

        // Root atoms have depth 0
        let mut depths: HashMap<&str, usize> = HashMap::with_capacity(self.order.len());
        for name in &self.order {
            let depth = self
                .dependencies(name)
                .iter()
                .map(|dep| depths.get(dep.as_str()).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depths.insert(name.as_str(), depth);
        }

        let max_depth = depths.values().copied().max().unwrap_or(0);
        let mut waves: Vec<Vec<String>> = vec![vec![]; max_depth + 1];
        for name in &self.order {
            waves[depths[name.as_str()]].push(name.clone());
        }
        waves
    }

    fn in_order(&self, reached: &HashSet<&str>) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| reached.contains(name.as_str()))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Three-colour DFS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Post-order DFS over dependency edges. Iterative, so deep chains cannot
/// overflow the stack. Assumes every dependency name resolves.
fn topological_order(registry: &AtomRegistry) -> Result<Vec<String>, EngineError> {
    let mut marks: HashMap<&str, Mark> = registry
        .names()
        .map(|name| (name, Mark::Unvisited))
        .collect();
    let mut order = Vec::with_capacity(registry.len());

    for root in registry.iter() {
        if marks[root.name()] != Mark::Unvisited {
            continue;
        }

        marks.insert(root.name(), Mark::InProgress);
        let mut stack: Vec<(&AtomDefinition, usize)> = vec![(root, 0)];

        while let Some(top) = stack.last_mut() {
            let atom = top.0;
            let next = top.1;
            top.1 += 1;

            match atom.dependencies().get(next) {
                Some(dep) => match marks[dep.as_str()] {
                    Mark::Unvisited => {
                        let dep_atom = registry.get(dep)?;
                        marks.insert(dep_atom.name(), Mark::InProgress);
                        stack.push((dep_atom, 0));
                    }
                    Mark::InProgress => {
                        let start = stack
                            .iter()
                            .position(|(a, _)| a.name() == dep.as_str())
                            .unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..]
                            .iter()
                            .map(|(a, _)| a.name().to_string())
                            .collect();
                        cycle.push(dep.clone());
                        return Err(EngineError::CycleDetected { cycle });
                    }
                    Mark::Done => {}
                },
                None => {
                    marks.insert(atom.name(), Mark::Done);
                    order.push(atom.name().to_string());
                    stack.pop();
                }
            }
        }
    }

    Ok(order)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
