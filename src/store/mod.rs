// src/store/mod.rs

//! Artifact and cache transfer between jobs.
//!
//! The runtime imports before a job is dispatched and exports once its
//! terminal status is known. [`LocalStore`] keeps everything under a state
//! directory; [`NoopStore`] does nothing.

use anyhow::Result;

use crate::dag::{ExportRequest, ScheduledJob};
use crate::job::{CacheSpec, JobDescriptor};

pub mod local;

pub use local::LocalStore;

pub trait ArtifactStore: Send {
    /// Bring predecessor artifacts and the job's caches into the workspace.
    fn import(&mut self, job: &ScheduledJob) -> Result<()>;
    /// Save the job's artifacts and caches.
    fn export(&mut self, request: &ExportRequest) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

impl ArtifactStore for NoopStore {
    fn import(&mut self, _job: &ScheduledJob) -> Result<()> {
        Ok(())
    }

    fn export(&mut self, _request: &ExportRequest) -> Result<()> {
        Ok(())
    }
}

/// What a finished job exports, given how its main script ended.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExportPlan<'a> {
    pub artifact_paths: Vec<&'a str>,
    pub caches: Vec<&'a CacheSpec>,
}

impl ExportPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.artifact_paths.is_empty() && self.caches.is_empty()
    }
}

/// Apply each entry's `when` gate to the main-script outcome.
pub fn export_plan(descriptor: &JobDescriptor, script_succeeded: bool) -> ExportPlan<'_> {
    let artifact_paths = descriptor
        .artifacts
        .as_ref()
        .filter(|a| a.when.allows(script_succeeded))
        .map(|a| a.paths.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let caches = descriptor
        .cache
        .iter()
        .filter(|c| c.when.allows(script_succeeded))
        .collect();

    ExportPlan {
        artifact_paths,
        caches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ArtifactsSpec;
    use crate::types::ExportWhen;

    fn descriptor() -> JobDescriptor {
        let mut job = JobDescriptor::new("build", "build");
        job.artifacts = Some(ArtifactsSpec {
            paths: vec!["dist".into()],
            when: ExportWhen::OnSuccess,
        });
        job.cache = vec![
            CacheSpec {
                key: "deps".into(),
                paths: vec!["vendor".into()],
                when: ExportWhen::Always,
            },
            CacheSpec {
                key: "crash".into(),
                paths: vec!["core".into()],
                when: ExportWhen::OnFailure,
            },
        ];
        job
    }

    #[test]
    fn success_exports_on_success_and_always() {
        let job = descriptor();
        let plan = export_plan(&job, true);
        assert_eq!(plan.artifact_paths, vec!["dist"]);
        let keys: Vec<_> = plan.caches.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["deps"]);
    }

    #[test]
    fn failure_exports_on_failure_and_always() {
        let job = descriptor();
        let plan = export_plan(&job, false);
        assert!(plan.artifact_paths.is_empty());
        let keys: Vec<_> = plan.caches.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["deps", "crash"]);
    }
}
