use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::entry::ClasspathEntry;
use crate::ClasspathError;

/// How [`ProjectGraph::check`] treats dependency cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    /// Cycles are returned as diagnostics.
    #[default]
    Report,
    /// The first cycle is a hard error.
    Strict,
}

/// Project dependency graph; an edge `a -> b` means `a` requires `b`.
#[derive(Debug, Default)]
pub struct ProjectGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
}

impl ProjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_projects<'a, I>(projects: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [ClasspathEntry])>,
    {
        let mut graph = Self::new();
        for (project, entries) in projects {
            graph.add_project(project);
            for required in entries.iter().filter_map(ClasspathEntry::required_project) {
                graph.add_dependency(project, required);
            }
        }
        graph
    }

    pub fn add_project(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), idx);
        idx
    }

    pub fn add_dependency(&mut self, project: &str, required: &str) {
        let from = self.add_project(project);
        let to = self.add_project(required);
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, ());
        }
    }

    /// Every dependency cycle, each sorted by name; the list itself is sorted.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let mut cycles: Vec<Vec<String>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&idx| self.graph.find_edge(idx, idx).is_some())
            })
            .map(|component| {
                let mut names: Vec<String> = component
                    .into_iter()
                    .map(|idx| self.graph[idx].clone())
                    .collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    pub fn check(&self, mode: CycleMode) -> Result<Vec<Vec<String>>, ClasspathError> {
        let cycles = self.cycles();
        if cycles.is_empty() {
            return Ok(cycles);
        }
        match mode {
            CycleMode::Report => {
                for cycle in &cycles {
                    tracing::warn!(
                        target = "nova.classpath",
                        projects = %cycle.join(", "),
                        "project dependency cycle detected"
                    );
                }
                Ok(cycles)
            }
            CycleMode::Strict => Err(ClasspathError::CycleDetected {
                projects: cycles[0].clone(),
            }),
        }
    }

    /// Projects ordered so that every project comes after the projects it requires.
    pub fn build_order(&self) -> Result<Vec<String>, ClasspathError> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order
                .into_iter()
                .rev()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(cycle) => {
                let culprit = &self.graph[cycle.node_id()];
                let projects = self
                    .cycles()
                    .into_iter()
                    .find(|names| names.contains(culprit))
                    .unwrap_or_else(|| vec![culprit.clone()]);
                Err(ClasspathError::CycleDetected { projects })
            }
        }
    }
}
