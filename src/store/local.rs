// src/store/local.rs

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use crate::dag::{ExportRequest, ScheduledJob};
use crate::fs::{FileSystem, RealFileSystem};
use crate::store::{export_plan, ArtifactStore};

/// Default state directory, relative to the workspace.
pub const STATE_DIR: &str = ".localci";

/// Store backed by directories under the workspace:
///
/// - artifacts of job `J` live in `<state>/artifacts/<slug(J)>/<path>`
/// - cache `K` lives in `<state>/cache/<slug(K)>/<path>`
#[derive(Debug, Clone)]
pub struct LocalStore<F: FileSystem = RealFileSystem> {
    fs: F,
    workdir: PathBuf,
    state_dir: PathBuf,
}

impl LocalStore<RealFileSystem> {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        let state_dir = workdir.join(STATE_DIR);
        Self::with_fs(RealFileSystem, workdir, state_dir)
    }
}

impl<F: FileSystem> LocalStore<F> {
    pub fn with_fs(fs: F, workdir: impl Into<PathBuf>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            workdir: workdir.into(),
            state_dir: state_dir.into(),
        }
    }

    pub fn artifacts_dir(&self, job: &str) -> PathBuf {
        self.state_dir.join("artifacts").join(slug(job))
    }

    pub fn cache_dir(&self, key: &str) -> PathBuf {
        self.state_dir.join("cache").join(slug(key))
    }

    fn save(&self, job: &str, src_rel: &str, dst_root: &Path) -> Result<()> {
        let src = self.workdir.join(src_rel);
        if self.state_dir.starts_with(&src) {
            warn!(job = %job, path = %src_rel, "path contains the state directory; skipped");
            return Ok(());
        }
        let copied = self.fs.copy_tree(&src, &dst_root.join(src_rel))?;
        if copied == 0 {
            warn!(job = %job, path = %src_rel, "no files matched; nothing saved");
        }
        Ok(())
    }

    fn restore(&self, job: &str, root: &Path) -> Result<()> {
        if !self.fs.is_dir(root) {
            return Ok(());
        }
        let copied = self.fs.copy_tree(root, &self.workdir)?;
        debug!(job = %job, from = %root.display(), files = copied, "restored files");
        Ok(())
    }
}

impl<F: FileSystem> ArtifactStore for LocalStore<F> {
    fn import(&mut self, job: &ScheduledJob) -> Result<()> {
        for source in job.artifact_sources.iter() {
            let dir = self.artifacts_dir(source);
            self.restore(&job.name, &dir)?;
        }
        for cache in job.descriptor.cache.iter() {
            let dir = self.cache_dir(&cache.key);
            self.restore(&job.name, &dir)?;
        }
        Ok(())
    }

    fn export(&mut self, request: &ExportRequest) -> Result<()> {
        let plan = export_plan(&request.descriptor, request.script_succeeded);
        if plan.is_empty() {
            return Ok(());
        }

        let artifacts_root = self.artifacts_dir(&request.job);
        for path in plan.artifact_paths.iter() {
            self.save(&request.job, path, &artifacts_root)?;
        }
        for cache in plan.caches.iter() {
            let cache_root = self.cache_dir(&cache.key);
            for path in cache.paths.iter() {
                self.save(&request.job, path, &cache_root)?;
            }
        }

        debug!(
            job = %request.job,
            artifacts = plan.artifact_paths.len(),
            caches = plan.caches.len(),
            "exported"
        );
        Ok(())
    }
}

/// Directory-safe form of a job name or cache key (`build: [1/2]` -> `build___1_2_`).
pub fn slug(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
