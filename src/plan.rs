//! Static dependency analysis of a pipeline.
//!
//! A run never consults this graph to order work; stages order themselves
//! through [`crate::depends::Depends`]. The graph exists to reject pipelines
//! that would deadlock (dangling references, cycles) before anything is
//! spawned, to give teardown each stage's dependents, and to print waves.

use std::collections::{BTreeMap, BTreeSet};

use crate::errors::PipelineError;
use crate::stage::Stage;

/// Validated dependency graph keyed by stage key.
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    /// key -> stages it depends on
    dependencies: BTreeMap<String, Vec<String>>,
    /// key -> stages that depend on it
    dependents: BTreeMap<String, Vec<String>>,
}

impl StageGraph {
    /// Build and validate the graph.
    ///
    /// Fails on the first reference to an unknown stage, or when the
    /// dependencies contain a cycle.
    pub fn build(stages: &BTreeMap<String, Stage>) -> Result<Self, PipelineError> {
        let mut dependencies = BTreeMap::new();
        let mut dependents: BTreeMap<String, Vec<String>> =
            stages.keys().map(|k| (k.clone(), Vec::new())).collect();

        for (key, stage) in stages {
            let mut seen = BTreeSet::new();
            for dep in &stage.depends {
                let Some(edges) = dependents.get_mut(dep) else {
                    return Err(PipelineError::UnknownDependency {
                        stage: key.clone(),
                        dependency: dep.clone(),
                    });
                };
                // A repeated entry is one edge.
                if seen.insert(dep.as_str()) {
                    edges.push(key.clone());
                }
            }
            dependencies.insert(key.clone(), seen.into_iter().map(String::from).collect());
        }

        let graph = Self {
            dependencies,
            dependents,
        };
        graph.validate_no_cycles()?;
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.dependencies.contains_key(key)
    }

    /// Stages `key` depends on.
    pub fn dependencies(&self, key: &str) -> &[String] {
        self.dependencies.get(key).map_or(&[], |v| v.as_slice())
    }

    /// Stages that depend on `key`.
    pub fn dependents(&self, key: &str) -> &[String] {
        self.dependents.get(key).map_or(&[], |v| v.as_slice())
    }

    /// Groups of stages whose installs may proceed together.
    ///
    /// Every stage appears in the wave after the last of its dependencies.
    pub fn install_waves(&self) -> Vec<Vec<String>> {
        Self::waves(&self.dependencies)
    }

    /// Install waves reversed: dependents are deleted first.
    pub fn teardown_waves(&self) -> Vec<Vec<String>> {
        Self::waves(&self.dependents)
    }

    /// Layered topological sort over `edges` (node -> prerequisites).
    fn waves(edges: &BTreeMap<String, Vec<String>>) -> Vec<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> =
            edges.iter().map(|(k, deps)| (k.as_str(), deps.len())).collect();
        let mut waves = Vec::new();

        loop {
            let wave: Vec<String> = remaining
                .iter()
                .filter(|&(_, &n)| n == 0)
                .map(|(&k, _)| k.to_string())
                .collect();
            if wave.is_empty() {
                break;
            }
            for key in &wave {
                remaining.remove(key.as_str());
            }
            for (key, deps) in edges {
                if let Some(n) = remaining.get_mut(key.as_str()) {
                    *n -= deps.iter().filter(|d| wave.contains(d)).count();
                }
            }
            waves.push(wave);
        }
        waves
    }

    /// Kahn's algorithm; whatever cannot be ordered is on or behind a cycle.
    fn validate_no_cycles(&self) -> Result<(), PipelineError> {
        let placed: BTreeSet<String> = self.install_waves().into_iter().flatten().collect();
        if placed.len() == self.len() {
            return Ok(());
        }

        let stages = self
            .dependencies
            .keys()
            .filter(|k| !placed.contains(*k))
            .cloned()
            .collect();
        Err(PipelineError::DependencyCycle { stages })
    }
}
