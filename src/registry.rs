//! The task graph.
//!
//! A [`Task`] is a named unit of work with an optional action and an ordered
//! list of prerequisite task names. Tasks live as nodes of a directed graph,
//! with an edge from every prerequisite to the task depending on it. The graph
//! is kept acyclic at all times: a registration that would close a cycle is
//! rejected and rolled back.
//!
//! Prerequisites may be named before they are registered. Such references are
//! only checked when a plan is resolved, mirroring how build files are usually
//! written top to bottom.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::error::RegistryError;
use crate::runner::Context;

/// Result of a single task action.
pub type TaskResult = anyhow::Result<()>;

type ActionFn = Arc<dyn Fn(&Context<'_>) -> TaskResult + Send + Sync>;

pub struct Task {
    name: String,
    deps: Vec<String>,
    action: Option<ActionFn>,
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deps(&self) -> &[String] {
        &self.deps
    }

    /// Runs the action, if any. Group tasks succeed trivially.
    pub(crate) fn call(&self, cx: &Context<'_>) -> TaskResult {
        match &self.action {
            Some(action) => action(cx),
            None => Ok(()),
        }
    }
}

impl Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("action", &self.action.as_ref().map(|_| "*"))
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    graph: Graph<Task, ()>,
    index: HashMap<String, NodeIndex>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task running `action` after `deps` have run.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        deps: impl IntoIterator<Item = impl Into<String>>,
        action: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&Context<'_>) -> TaskResult + Send + Sync + 'static,
    {
        self.insert(Task {
            name: name.into(),
            deps: deps.into_iter().map(Into::into).collect(),
            action: Some(Arc::new(action)),
        })
    }

    /// Registers a task without an action of its own, which only exists to
    /// run its prerequisites.
    pub fn group(
        &mut self,
        name: impl Into<String>,
        deps: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(), RegistryError> {
        self.insert(Task {
            name: name.into(),
            deps: deps.into_iter().map(Into::into).collect(),
            action: None,
        })
    }

    fn insert(&mut self, task: Task) -> Result<(), RegistryError> {
        if self.index.contains_key(&task.name) {
            return Err(RegistryError::DuplicateTask(task.name));
        }

        let name = task.name.clone();
        let deps = task.deps.clone();
        let node = self.graph.add_node(task);

        // Edges from already registered prerequisites...
        for dep in &deps {
            if *dep == name {
                self.graph.add_edge(node, node, ());
            } else if let Some(&from) = self.index.get(dep) {
                self.graph.add_edge(from, node, ());
            }
        }

        // ...and to already registered tasks waiting for this one.
        let waiting: Vec<_> = self
            .index
            .values()
            .copied()
            .filter(|&i| self.graph[i].deps.contains(&name))
            .collect();

        for to in waiting {
            self.graph.add_edge(node, to, ());
        }

        if petgraph::algo::is_cyclic_directed(&self.graph) {
            let cycle = self.find_cycle(&name);
            // `node` is the last index, so removing it leaves every other
            // index in place.
            self.graph.remove_node(node);
            return Err(RegistryError::CyclicDependency(cycle));
        }

        self.index.insert(name, node);
        Ok(())
    }

    /// Walks prerequisites from a freshly added node back to itself.
    fn find_cycle(&self, start: &str) -> Vec<String> {
        fn walk<'a>(
            graph: &'a Graph<Task, ()>,
            by_name: &HashMap<&'a str, NodeIndex>,
            current: &'a str,
            start: &str,
            path: &mut Vec<String>,
            seen: &mut HashSet<&'a str>,
        ) -> bool {
            path.push(current.to_string());

            if let Some(&node) = by_name.get(current) {
                for dep in &graph[node].deps {
                    if dep == start {
                        path.push(dep.clone());
                        return true;
                    }
                    if seen.insert(dep.as_str()) && walk(graph, by_name, dep, start, path, seen) {
                        return true;
                    }
                }
            }

            path.pop();
            false
        }

        let by_name: HashMap<&str, NodeIndex> = self
            .graph
            .node_indices()
            .map(|i| (self.graph[i].name.as_str(), i))
            .collect();

        let mut path = Vec::new();
        let mut seen = HashSet::new();
        walk(&self.graph, &by_name, start, start, &mut path, &mut seen);
        path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&i| &self.graph[i])
    }

    /// Task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|task| task.name.as_str())
    }

    /// Returns everything needed to run `name`: its transitive prerequisites
    /// in dependency order, each exactly once, followed by the task itself.
    pub fn resolve(&self, name: &str) -> Result<Vec<&Task>, RegistryError> {
        let mut plan = Vec::new();
        let mut done = HashSet::new();
        let mut stack = Vec::new();

        self.visit(name, &mut stack, &mut done, &mut plan)?;

        Ok(plan)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String>,
        plan: &mut Vec<&'a Task>,
    ) -> Result<(), RegistryError> {
        if done.contains(name) {
            return Ok(());
        }

        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(RegistryError::CyclicDependency(cycle));
        }

        let task = self
            .get(name)
            .ok_or_else(|| RegistryError::UnknownTask(name.to_string()))?;

        stack.push(name.to_string());
        for dep in &task.deps {
            self.visit(dep, stack, done, plan)?;
        }
        stack.pop();

        done.insert(name.to_string());
        plan.push(task);

        Ok(())
    }
}

impl std::fmt::Display for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let task = &self.graph[index];
            let name = task.name.replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {} --> {}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}
