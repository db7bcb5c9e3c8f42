// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::{debug, warn};

use crate::errors::{PipelineError, Result};
use crate::job::{JobDescriptor, JobName, Need};
use crate::types::{SchedulingMode, When};

/// Inputs to graph construction besides the jobs themselves.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub mode: SchedulingMode,
    /// Jobs the operator authorized with `--manual` (exact or base names).
    pub manual: HashSet<String>,
}

/// Why one job waits for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Explicit `needs` entry (needs mode only).
    Need,
    /// Implicit "earlier stage must drain" barrier.
    StageBarrier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predecessor {
    pub job: JobName,
    pub kind: EdgeKind,
    /// Whether the predecessor's artifacts are imported before dispatch.
    pub artifacts: bool,
}

/// A resolved `needs` edge (target exists and is runnable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeedEdge {
    pub job: JobName,
    pub artifacts: bool,
}

#[derive(Debug, Clone)]
struct DagNode {
    descriptor: Arc<JobDescriptor>,
    stage_index: usize,
    declared_index: usize,
    /// Resolved needs; `None` when the job has no `needs` key.
    needs: Option<Vec<NeedEdge>>,
    /// What the job waits for under the graph's scheduling mode.
    predecessors: Vec<Predecessor>,
    /// Jobs that list this one as a predecessor, in declaration order.
    dependents: Vec<JobName>,
}

/// Validated dependency graph over the expanded job list.
///
/// Construction fails fast on configuration errors so nothing is dispatched
/// for an invalid pipeline.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: HashMap<JobName, DagNode>,
    order: Vec<JobName>,
    stages: Vec<String>,
    mode: SchedulingMode,
    manual: HashSet<String>,
    warnings: Vec<String>,
}

impl DependencyGraph {
    /// Build and validate the graph.
    ///
    /// Checks, in order:
    /// - every job's stage is a declared stage and names are unique
    /// - every need resolves (exact name, or base name fanning in to all
    ///   matrix variants); optional needs on missing jobs are dropped
    /// - no need targets a `when: never` job
    /// - no need targets a `when: manual` job that is not authorized
    /// - the resulting wait-for relation is acyclic
    ///
    /// Unsupported need references are dropped with a warning.
    pub fn build(jobs: Vec<JobDescriptor>, stages: &[String], options: &BuildOptions) -> Result<Self> {
        let mut graph = Self {
            nodes: HashMap::new(),
            order: Vec::with_capacity(jobs.len()),
            stages: stages.to_vec(),
            mode: options.mode,
            manual: options.manual.clone(),
            warnings: Vec::new(),
        };

        graph.insert_nodes(jobs)?;
        graph.resolve_needs()?;
        graph.compute_predecessors();
        graph.check_acyclic()?;

        debug!(
            jobs = graph.order.len(),
            mode = ?graph.mode,
            warnings = graph.warnings.len(),
            "dependency graph built"
        );
        Ok(graph)
    }

    fn insert_nodes(&mut self, jobs: Vec<JobDescriptor>) -> Result<()> {
        for (declared_index, job) in jobs.into_iter().enumerate() {
            let stage_index = self
                .stages
                .iter()
                .position(|s| *s == job.stage)
                .ok_or_else(|| {
                    PipelineError::UnknownStage(format!(
                        "job '{}' uses stage '{}', which is not in `stages`",
                        job.name, job.stage
                    ))
                })?;

            if self.nodes.contains_key(&job.name) {
                return Err(PipelineError::ConfigError(format!(
                    "job name '{}' is used more than once",
                    job.name
                )));
            }

            let name = job.name.clone();
            self.order.push(name.clone());
            self.nodes.insert(
                name,
                DagNode {
                    descriptor: Arc::new(job),
                    stage_index,
                    declared_index,
                    needs: None,
                    predecessors: Vec::new(),
                    dependents: Vec::new(),
                },
            );
        }
        Ok(())
    }

    fn resolve_needs(&mut self) -> Result<()> {
        let mut by_base: HashMap<String, Vec<JobName>> = HashMap::new();
        for name in self.order.iter() {
            let base = self.nodes[name].descriptor.base_name.clone();
            by_base.entry(base).or_default().push(name.clone());
        }

        for name in self.order.clone() {
            let Some(needs) = self.nodes[&name].descriptor.needs.clone() else {
                continue;
            };

            let mut edges = Vec::new();
            for need in needs {
                match need {
                    Need::Unsupported { reference } => {
                        let msg = format!(
                            "`{}` needs unsupported reference ({}); edge ignored",
                            name, reference
                        );
                        warn!(job = %name, reference = %reference, "unsupported need reference; ignoring");
                        self.warnings.push(msg);
                    }
                    Need::Job {
                        job: target,
                        artifacts,
                        optional,
                    } => {
                        let targets = if self.nodes.contains_key(&target) {
                            vec![target.clone()]
                        } else {
                            by_base.get(&target).cloned().unwrap_or_default()
                        };

                        if targets.is_empty() {
                            if optional {
                                debug!(job = %name, need = %target, "optional need not present; dropped");
                                continue;
                            }
                            return Err(PipelineError::UnknownNeed {
                                source_job: name.clone(),
                                target,
                            });
                        }

                        for t in targets {
                            self.check_need_target(&name, &t)?;
                            if !edges.iter().any(|e: &NeedEdge| e.job == t) {
                                edges.push(NeedEdge { job: t, artifacts });
                            }
                        }
                    }
                }
            }

            if let Some(node) = self.nodes.get_mut(&name) {
                node.needs = Some(edges);
            }
        }
        Ok(())
    }

    fn check_need_target(&self, source: &str, target: &str) -> Result<()> {
        if source == target {
            return Err(PipelineError::DagCycle(format!(
                "job '{}' needs itself",
                source
            )));
        }

        let descriptor = &self.nodes[target].descriptor;
        match descriptor.when {
            When::Never => Err(PipelineError::NeverNeeded {
                source_job: source.to_string(),
                target: target.to_string(),
            }),
            When::Manual if !self.is_manual_authorized(target) => {
                Err(PipelineError::ManualNotAuthorized {
                    source_job: source.to_string(),
                    target: target.to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn compute_predecessors(&mut self) {
        let stage_of: Vec<(JobName, usize)> = self
            .order
            .iter()
            .map(|n| (n.clone(), self.nodes[n].stage_index))
            .collect();

        for name in self.order.clone() {
            let node = &self.nodes[&name];
            let predecessors: Vec<Predecessor> = match (self.mode, &node.needs) {
                (SchedulingMode::Needs, Some(edges)) => edges
                    .iter()
                    .map(|e| Predecessor {
                        job: e.job.clone(),
                        kind: EdgeKind::Need,
                        artifacts: e.artifacts,
                    })
                    .collect(),
                _ => stage_of
                    .iter()
                    .filter(|(_, stage)| *stage < node.stage_index)
                    .map(|(other, _)| Predecessor {
                        job: other.clone(),
                        kind: EdgeKind::StageBarrier,
                        artifacts: true,
                    })
                    .collect(),
            };

            for pred in predecessors.iter() {
                if let Some(p) = self.nodes.get_mut(&pred.job) {
                    p.dependents.push(name.clone());
                }
            }
            if let Some(node) = self.nodes.get_mut(&name) {
                node.predecessors = predecessors;
            }
        }
    }

    fn check_acyclic(&self) -> Result<()> {
        // Edge direction: predecessor -> job.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.order.iter() {
            graph.add_node(name.as_str());
        }
        for name in self.order.iter() {
            for pred in self.nodes[name].predecessors.iter() {
                graph.add_edge(pred.job.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(PipelineError::DagCycle(format!(
                "cycle detected in job graph involving job '{}'",
                cycle.node_id()
            ))),
        }
    }

    /// Whether `name` (exact or via its base name) was authorized to run
    /// despite `when: manual`.
    pub fn is_manual_authorized(&self, name: &str) -> bool {
        if self.manual.contains(name) {
            return true;
        }
        self.nodes
            .get(name)
            .is_some_and(|n| self.manual.contains(&n.descriptor.base_name))
    }

    /// All job names in declaration order.
    pub fn jobs(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
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

    pub fn descriptor(&self, name: &str) -> Option<&Arc<JobDescriptor>> {
        self.nodes.get(name).map(|n| &n.descriptor)
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// Non-fatal problems found while building (dropped edges).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn stage_index_of(&self, name: &str) -> Option<usize> {
        self.nodes.get(name).map(|n| n.stage_index)
    }

    pub fn declared_index_of(&self, name: &str) -> Option<usize> {
        self.nodes.get(name).map(|n| n.declared_index)
    }

    /// Resolved `needs` of a job, `None` if it has no `needs` key.
    pub fn needs_of(&self, name: &str) -> Option<&[NeedEdge]> {
        self.nodes
            .get(name)
            .and_then(|n| n.needs.as_deref())
    }

    /// What the job waits for under the current scheduling mode.
    pub fn predecessors_of(&self, name: &str) -> &[Predecessor] {
        self.nodes
            .get(name)
            .map(|n| n.predecessors.as_slice())
            .unwrap_or(&[])
    }

    /// Jobs that wait for `name`, in declaration order.
    pub fn dependents_of(&self, name: &str) -> &[JobName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Names matching `name` exactly, or every variant sharing that base name.
    pub fn resolve_name(&self, name: &str) -> Vec<JobName> {
        if self.nodes.contains_key(name) {
            return vec![name.to_string()];
        }
        self.order
            .iter()
            .filter(|n| self.nodes[*n].descriptor.base_name == name)
            .cloned()
            .collect()
    }

    /// `roots` plus everything they transitively need, in declaration order.
    pub fn needs_closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> Vec<JobName> {
        let mut seen: HashSet<JobName> = HashSet::new();
        let mut stack: Vec<JobName> = roots.into_iter().map(|s| s.to_string()).collect();

        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(needs) = self.needs_of(&name) {
                stack.extend(needs.iter().map(|e| e.job.clone()));
            }
        }

        self.order
            .iter()
            .filter(|n| seen.contains(*n))
            .cloned()
            .collect()
    }
}
