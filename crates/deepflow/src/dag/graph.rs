//! Dependency graph over step definitions.
//!
//! An edge `(a, b)` means `b` depends on `a`. Construction rejects unknown
//! nodes, duplicate ids, cycles (reporting the cycle path) and input/condition
//! references to steps that are not transitively upstream.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::FlowError;
use crate::workflow::StepDefinition;

/// Validated, acyclic step graph
#[derive(Debug, Clone)]
pub struct Dag {
    /// Node ids in declaration order
    order: Vec<String>,
    nodes: HashMap<String, Arc<StepDefinition>>,
    dependencies: HashMap<String, BTreeSet<String>>,
    dependents: HashMap<String, BTreeSet<String>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl Dag {
    /// Build a graph from nodes and `(dependency, dependent)` edges
    pub fn build(
        nodes: Vec<StepDefinition>,
        edges: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Dag, FlowError> {
        let mut order = Vec::with_capacity(nodes.len());
        let mut map = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if map.contains_key(&node.id) {
                return Err(FlowError::validation(format!("duplicate step id '{}'", node.id)));
            }
            order.push(node.id.clone());
            map.insert(node.id.clone(), Arc::new(node));
        }

        let mut dependencies: HashMap<String, BTreeSet<String>> =
            order.iter().map(|id| (id.clone(), BTreeSet::new())).collect();
        let mut dependents = dependencies.clone();

        for (from, to) in edges {
            for end in [&from, &to] {
                if !map.contains_key(end) {
                    return Err(FlowError::validation(format!(
                        "edge {} -> {} references unknown step '{}'",
                        from, to, end
                    )));
                }
            }
            dependencies.entry(to.clone()).or_default().insert(from.clone());
            dependents.entry(from).or_default().insert(to);
        }

        let dag = Dag {
            order,
            nodes: map,
            dependencies,
            dependents,
        };

        if let Some(cycle) = dag.find_cycle() {
            return Err(FlowError::cycle(cycle));
        }
        dag.check_references()?;
        Ok(dag)
    }

    /// Build a graph whose edges are each step's explicit and inferred dependencies
    pub fn from_steps(steps: Vec<StepDefinition>) -> Result<Dag, FlowError> {
        let declared: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let mut edges = Vec::new();
        for step in &steps {
            for dep in step.all_dependencies() {
                if !declared.contains(dep.as_str()) {
                    return Err(FlowError::validation(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
                edges.push((dep, step.id.clone()));
            }
        }
        Dag::build(steps, edges)
    }

    /// DFS along dependent edges; returns `[a, b, ..., a]` for the first cycle found
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> =
            self.order.iter().map(|id| (id.as_str(), Mark::Unvisited)).collect();
        let mut stack: Vec<&str> = Vec::new();

        for start in &self.order {
            if marks[start.as_str()] == Mark::Unvisited {
                if let Some(cycle) = self.visit(start, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::InProgress);
        stack.push(node);

        for next in self.dependents.get(node).into_iter().flatten() {
            match marks.get(next.as_str()).copied().unwrap_or(Mark::Unvisited) {
                Mark::InProgress => {
                    let pos = stack.iter().position(|n| *n == next.as_str()).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = self.visit(next, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    fn check_references(&self) -> Result<(), FlowError> {
        for id in &self.order {
            let step = &self.nodes[id];
            for referenced in step.binding_steps().iter().chain(step.condition_steps().iter()) {
                if !self.nodes.contains_key(referenced) {
                    return Err(FlowError::validation(format!(
                        "step '{}' references unknown step '{}'",
                        id, referenced
                    )));
                }
                if !self.is_upstream(referenced, id) {
                    return Err(FlowError::validation(format!(
                        "step '{}' references '{}' which is not upstream of it",
                        id, referenced
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Arc<StepDefinition>> {
        self.nodes.get(id)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<StepDefinition>> {
        self.order.iter().filter_map(move |id| self.nodes.get(id))
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Direct dependencies of a node
    pub fn dependencies(&self, id: &str) -> impl Iterator<Item = &String> {
        self.dependencies.get(id).into_iter().flatten()
    }

    /// Direct dependents of a node
    pub fn dependents(&self, id: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(id).into_iter().flatten()
    }

    /// Nodes without dependencies
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.dependencies.get(*id).map_or(true, BTreeSet::is_empty))
            .cloned()
            .collect()
    }

    /// Check if `upstream` is a transitive dependency of `node`
    pub fn is_upstream(&self, upstream: &str, node: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self.dependencies(node).map(String::as_str).collect();
        while let Some(current) = queue.pop_front() {
            if current == upstream {
                return true;
            }
            if seen.insert(current) {
                queue.extend(self.dependencies(current).map(String::as_str));
            }
        }
        false
    }

    /// Nodes not in `completed` whose every dependency is, in declaration order
    pub fn ready_nodes(&self, completed: &HashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| !completed.contains(*id))
            .filter(|id| self.dependencies(id).all(|dep| completed.contains(dep)))
            .cloned()
            .collect()
    }

    /// Topological order, ties broken by declaration order
    pub fn topological_order(&self) -> Vec<String> {
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut remaining: HashMap<&str, usize> = self
            .order
            .iter()
            .map(|id| (id.as_str(), self.dependencies.get(id).map_or(0, BTreeSet::len)))
            .collect();

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| position[id])
            .collect();

        let mut sorted = Vec::with_capacity(self.order.len());
        while let Some(idx) = ready.pop_first() {
            let id = &self.order[idx];
            sorted.push(id.clone());
            for dependent in self.dependents(id) {
                if let Some(n) = remaining.get_mut(dependent.as_str()) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(position[dependent.as_str()]);
                    }
                }
            }
        }
        sorted
    }
}
