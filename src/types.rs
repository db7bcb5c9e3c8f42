use std::fmt;

use serde::Deserialize;

/// Resolved execution condition of a job.
///
/// Rule evaluation happens upstream; by the time a job reaches the engine
/// this is the single effective value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum When {
    OnSuccess,
    OnFailure,
    Always,
    Never,
    Manual,
    Delayed,
}

impl Default for When {
    fn default() -> Self {
        When::OnSuccess
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            When::OnSuccess => "on_success",
            When::OnFailure => "on_failure",
            When::Always => "always",
            When::Never => "never",
            When::Manual => "manual",
            When::Delayed => "delayed",
        };
        f.write_str(s)
    }
}

/// Gate for exporting artifacts and caches after a job's main script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportWhen {
    OnSuccess,
    OnFailure,
    Always,
}

impl Default for ExportWhen {
    fn default() -> Self {
        ExportWhen::OnSuccess
    }
}

impl ExportWhen {
    /// Whether an export should happen given the outcome of the main script
    /// (`after_script` never influences this).
    pub fn allows(self, script_succeeded: bool) -> bool {
        match self {
            ExportWhen::OnSuccess => script_succeeded,
            ExportWhen::OnFailure => !script_succeeded,
            ExportWhen::Always => true,
        }
    }
}

/// How the engine orders jobs.
///
/// - `Stages`: a job waits for every earlier stage to drain; `needs` is
///   informational only.
/// - `Needs`: explicit `needs` edges replace the stage barrier for jobs that
///   declare them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    Stages,
    Needs,
}

impl Default for SchedulingMode {
    fn default() -> Self {
        SchedulingMode::Stages
    }
}

impl SchedulingMode {
    pub fn from_needs_flag(needs: bool) -> Self {
        if needs {
            SchedulingMode::Needs
        } else {
            SchedulingMode::Stages
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_displays_as_written_in_pipeline_files() {
        assert_eq!(When::OnFailure.to_string(), "on_failure");
        assert_eq!(When::default(), When::OnSuccess);
        assert_eq!(SchedulingMode::from_needs_flag(true), SchedulingMode::Needs);
    }

    #[test]
    fn export_gate_follows_script_outcome() {
        assert!(ExportWhen::OnSuccess.allows(true));
        assert!(!ExportWhen::OnSuccess.allows(false));
        assert!(ExportWhen::OnFailure.allows(false));
        assert!(!ExportWhen::OnFailure.allows(true));
        assert!(ExportWhen::Always.allows(true));
        assert!(ExportWhen::Always.allows(false));
    }
}
