// crates/taskloom-core/src/runtime/graph.rs
// ============================================================================
// Module: Task Loom Graph Scheduler
// Description: Dependency-graph view over a template's stages, with ready-set
//              computation and cycle bounding.
// Purpose: Let the engine drive either a linear or graph-structured pipeline
//          from the same `Template`.
// Dependencies: crate::core::template, thiserror, std::collections
// ============================================================================

//! ## Overview
//! When every `StageDef::depends_on` list is empty, the graph degenerates to
//! the template's `order` sequence (linear mode). Otherwise stages become
//! ready once every dependency has reached a terminal, non-redirected
//! status.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;

use thiserror::Error;

use crate::core::StageStatus;
use crate::core::Template;

// ============================================================================
// SECTION: Graph Error
// ============================================================================

/// Errors raised while building or validating a graph from a template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A stage's `depends_on` names a stage absent from the template.
    #[error("stage {stage} depends on unknown stage {dependency}")]
    UnknownDependency {
        /// Name of the stage with the dangling dependency.
        stage: String,
        /// Name of the missing dependency.
        dependency: String,
    },
    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected involving stage {0}")]
    Cycle(String),
}

// ============================================================================
// SECTION: Graph
// ============================================================================

/// A validated dependency view over a template's stages.
///
/// # Invariants
/// - Built only via [`Graph::from_template`], which rejects unknown
///   dependencies and cycles.
#[derive(Debug, Clone)]
pub struct Graph {
    order: Vec<String>,
    depends_on: HashMap<String, Vec<String>>,
}

impl Graph {
    /// Builds and validates a graph from a template's stage definitions.
    ///
    /// # Errors
    /// Returns [`GraphError::UnknownDependency`] when a dependency name does
    /// not match any stage, or [`GraphError::Cycle`] when the dependencies
    /// are not acyclic.
    pub fn from_template(template: &Template) -> Result<Self, GraphError> {
        let names: HashSet<&str> = template.stages.iter().map(|stage| stage.name.as_str()).collect();

        let mut depends_on = HashMap::new();
        for stage in &template.stages {
            let deps = if stage.depends_on.is_empty() {
                linear_predecessor(template, stage.order)
            } else {
                stage.depends_on.clone()
            };
            for dep in &deps {
                if !names.contains(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        stage: stage.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            depends_on.insert(stage.name.clone(), deps);
        }

        let mut order: Vec<String> = template.stages.iter().map(|s| s.name.clone()).collect();
        order.sort();

        let graph = Self { order, depends_on };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();

        for name in &self.order {
            self.visit(name, &mut visited, &mut in_progress)?;
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        visited: &mut HashSet<&'a str>,
        in_progress: &mut HashSet<&'a str>,
    ) -> Result<(), GraphError> {
        if visited.contains(name) {
            return Ok(());
        }
        if in_progress.contains(name) {
            return Err(GraphError::Cycle(name.to_string()));
        }
        in_progress.insert(name);
        if let Some(deps) = self.depends_on.get(name) {
            for dep in deps {
                self.visit(dep.as_str(), visited, in_progress)?;
            }
        }
        in_progress.remove(name);
        visited.insert(name);
        Ok(())
    }

    /// Returns the dependency names for a given stage.
    #[must_use]
    pub fn dependencies_of(&self, stage_name: &str) -> &[String] {
        self.depends_on.get(stage_name).map_or(&[], Vec::as_slice)
    }

    /// Computes the set of stages whose dependencies have all reached a
    /// terminal, advancing status (`Completed` or `Skipped`), and which are
    /// themselves either `Pending`, or `Failed` with executions still left
    /// under their `max_executions` budget (e.g. after an `on_failure`
    /// redirect resets an upstream stage back to `Pending`).
    #[must_use]
    pub fn ready_set(
        &self,
        statuses: &HashMap<String, StageStatus>,
        exec_counts: &HashMap<String, u32>,
        max_executions: &HashMap<String, u32>,
    ) -> ReadySet {
        let mut ready = BTreeSet::new();
        for name in &self.order {
            let status = statuses.get(name).copied().unwrap_or(StageStatus::Pending);
            match status {
                StageStatus::Running | StageStatus::Completed | StageStatus::Skipped => continue,
                StageStatus::Pending => {}
                StageStatus::Failed => {
                    let count = exec_counts.get(name).copied().unwrap_or(0);
                    let limit = max_executions.get(name).copied().unwrap_or(1);
                    if count >= limit {
                        continue;
                    }
                }
            }
            let deps = self.dependencies_of(name);
            let deps_done = deps.iter().all(|dep| {
                matches!(
                    statuses.get(dep).copied().unwrap_or(StageStatus::Pending),
                    StageStatus::Completed | StageStatus::Skipped
                )
            });
            if deps_done {
                ready.insert(name.clone());
            }
        }
        ReadySet { stage_names: ready }
    }

    /// Upper bound on total stage executions before the engine must treat
    /// the graph as non-terminating.
    #[must_use]
    pub fn max_total_executions(&self, per_stage_limits: &HashMap<String, u32>) -> u64 {
        let node_count = self.order.len() as u64;
        let per_node_max = per_stage_limits.values().copied().max().unwrap_or(1) as u64;
        per_node_max.saturating_mul(node_count)
    }
}

fn linear_predecessor(template: &Template, order: u32) -> Vec<String> {
    template
        .stages
        .iter()
        .filter(|stage| stage.order + 1 == order)
        .map(|stage| stage.name.clone())
        .collect()
}

// ============================================================================
// SECTION: Ready Set
// ============================================================================

/// The set of stage names eligible to run next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySet {
    /// Names of stages ready to execute, in deterministic (sorted) order.
    pub stage_names: BTreeSet<String>,
}

impl ReadySet {
    /// Returns true when no stage is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stage_names.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
