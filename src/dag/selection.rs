// src/dag/selection.rs

use tracing::debug;

use crate::dag::graph::DependencyGraph;
use crate::errors::{PipelineError, Result};
use crate::job::JobName;
use crate::types::SchedulingMode;

/// Which jobs of the graph take part in a run.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Exact or base job names; empty means "every job".
    pub targets: Vec<String>,
    /// Only jobs of this stage (plus, in needs mode, what they need).
    pub stage: Option<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn jobs<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            stage: None,
        }
    }
}

/// Resolve a selection to job names in declaration order.
///
/// In needs mode the transitive `needs` of every selected job are pulled in
/// so the run is self-contained.
pub fn select(graph: &DependencyGraph, selection: &Selection) -> Result<Vec<JobName>> {
    if let Some(stage) = &selection.stage {
        if !graph.stages().iter().any(|s| s == stage) {
            return Err(PipelineError::UnknownStage(format!(
                "stage '{}' is not in `stages`",
                stage
            )));
        }
    }

    let mut roots: Vec<JobName> = Vec::new();
    if selection.targets.is_empty() {
        roots.extend(graph.jobs().map(str::to_string));
    } else {
        for target in selection.targets.iter() {
            let matched = graph.resolve_name(target);
            if matched.is_empty() {
                return Err(PipelineError::UnknownJob(target.clone()));
            }
            roots.extend(matched);
        }
    }

    if let Some(stage) = &selection.stage {
        roots.retain(|name| {
            graph
                .descriptor(name)
                .is_some_and(|d| d.stage == *stage)
        });
    }

    let plan = match graph.mode() {
        SchedulingMode::Needs => graph.needs_closure(roots.iter().map(String::as_str)),
        SchedulingMode::Stages => {
            let mut plan: Vec<JobName> = graph
                .jobs()
                .filter(|name| roots.iter().any(|r| r == name))
                .map(str::to_string)
                .collect();
            plan.dedup();
            plan
        }
    };

    debug!(selected = plan.len(), "jobs selected for run");
    Ok(plan)
}
