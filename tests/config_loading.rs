// tests/config_loading.rs

use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fs;
use std::time::Duration;

use localci::config::loader::{load_and_validate, parse_str};
use localci::config::PipelineFile;
use localci::dag::Selection;
use localci::errors::PipelineError;
use localci::job::Need;
use localci::types::{ExportWhen, SchedulingMode, When};
use localci::{plan_pipeline, PlanOptions};

type TestResult = Result<(), Box<dyn Error>>;

const PIPELINE: &str = r#"
stages = ["build", "test", "deploy"]

[variables]
GLOBAL = "1"
LEVEL = "pipeline"

[job.compile]
stage = "build"
script = ["cargo build"]
artifacts = { paths = ["target/app"], when = "always" }
cache = { key = "cargo", paths = ["target/deps"] }

[job.unit]
stage = "test"
script = ["cargo test"]
needs = ["compile"]
retry = { max = 2, exit_codes = [137] }
coverage_regex = 'coverage: (\d+\.\d+)%'
variables = { LEVEL = "job" }

[job.matrix]
stage = "test"
script = ["echo $OS"]
needs = [{ job = "compile", artifacts = false }, { project = "other/repo", job = "lib", ref = "main" }]
parallel = { matrix = [{ OS = ["linux", "mac"], RUST = "stable" }] }

[job.ship]
stage = "deploy"
script = ["./ship.sh"]
when = "manual"
environment = { name = "production", url = "https://example.com" }

[job.canary]
stage = "deploy"
script = ["./canary.sh"]
when = "delayed"
start_in = "1m 30s"
timeout = "10m"
allow_failure = true
"#;

fn write_pipeline(contents: &str) -> Result<(tempfile::TempDir, std::path::PathBuf), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(".localci.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}

fn load(contents: &str) -> localci::errors::Result<PipelineFile> {
    PipelineFile::try_from(parse_str(contents)?)
}

#[test]
fn loads_and_resolves_a_full_pipeline() -> TestResult {
    let (_dir, path) = write_pipeline(PIPELINE)?;
    let pipeline = load_and_validate(&path)?;

    let names: Vec<_> = pipeline.job.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["compile", "unit", "matrix", "ship", "canary"]);

    let jobs = pipeline.job_descriptors(&BTreeMap::new())?;
    let unit = &jobs[1];
    assert_eq!(unit.needs, Some(vec![Need::job("compile")]));
    assert_eq!(unit.retry.max, 2);
    assert!(unit.retry.is_retryable(137));
    assert!(!unit.retry.is_retryable(1));
    assert_eq!(unit.variables["GLOBAL"], "1");
    assert_eq!(unit.variables["LEVEL"], "job");

    let compile = &jobs[0];
    assert_eq!(
        compile.artifacts.as_ref().map(|a| a.when),
        Some(ExportWhen::Always)
    );
    assert_eq!(compile.cache[0].key, "cargo");
    assert_eq!(compile.needs, None);

    let ship = &jobs[3];
    assert_eq!(ship.when, When::Manual);
    assert_eq!(
        ship.environment.as_ref().and_then(|e| e.url.as_deref()),
        Some("https://example.com")
    );

    let canary = &jobs[4];
    assert_eq!(canary.start_in, Some(Duration::from_secs(90)));
    assert_eq!(canary.timeout, Some(Duration::from_secs(600)));
    assert!(canary.allow_failure);
    Ok(())
}

#[test]
fn variable_overrides_win() -> TestResult {
    let pipeline = load(PIPELINE)?;
    let overrides = BTreeMap::from([("LEVEL".to_string(), "cli".to_string())]);
    let jobs = pipeline.job_descriptors(&overrides)?;
    assert!(jobs.iter().all(|j| j.variables["LEVEL"] == "cli"));
    Ok(())
}

#[test]
fn plan_expands_matrix_and_drops_unsupported_needs() -> TestResult {
    let pipeline = load(PIPELINE)?;
    let plan = plan_pipeline(
        &pipeline,
        &PlanOptions {
            mode: SchedulingMode::Needs,
            ..PlanOptions::default()
        },
    )?;

    assert!(plan.graph.contains("matrix: [linux, stable]"));
    assert!(plan.graph.contains("matrix: [mac, stable]"));
    assert!(!plan.graph.contains("matrix"));
    assert_eq!(plan.graph.warnings().len(), 2);

    let preds = plan.graph.predecessors_of("matrix: [mac, stable]");
    assert_eq!(preds.len(), 1);
    assert!(!preds[0].artifacts);
    assert_eq!(plan.jobs.len(), 6);
    Ok(())
}

#[test]
fn targeting_a_manual_job_authorizes_it() -> TestResult {
    let pipeline = load(
        r#"
stages = ["build", "deploy"]

[job.compile]
stage = "build"
script = ["make"]

[job.ship]
stage = "deploy"
script = ["./ship.sh"]
when = "manual"
needs = ["compile"]
"#,
    )?;

    let plan = plan_pipeline(
        &pipeline,
        &PlanOptions {
            mode: SchedulingMode::Needs,
            selection: Selection::jobs(["ship"]),
            ..PlanOptions::default()
        },
    )?;
    assert!(plan.graph.is_manual_authorized("ship"));
    assert_eq!(plan.jobs, vec!["compile", "ship"]);

    let plan = plan_pipeline(
        &pipeline,
        &PlanOptions {
            manual: HashSet::from(["ship".to_string()]),
            ..PlanOptions::default()
        },
    )?;
    assert!(plan.graph.is_manual_authorized("ship"));
    Ok(())
}

#[test]
fn rejects_unknown_stage() {
    let err = load(
        r#"
stages = ["build"]

[job.unit]
stage = "test"
script = ["true"]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownStage(_)));
}

#[test]
fn rejects_delayed_job_without_start_in() {
    let err = load(
        r#"
[job.canary]
stage = "deploy"
when = "delayed"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::ConfigError(_)));
}

#[test]
fn rejects_bad_coverage_regex_and_duration() {
    let err = load(
        r#"
[job.unit]
coverage_regex = "(unclosed"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::ConfigError(_)));

    let err = load(
        r#"
[job.unit]
timeout = "soon"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::ConfigError(_)));

    let err = load(
        r#"
[job.unit]
timeout = "18446744073709551615s 1s"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, PipelineError::ConfigError(_)));
}

#[test]
fn rejects_empty_pipeline_and_bad_toml() {
    assert!(matches!(
        load("stages = [\"build\"]").unwrap_err(),
        PipelineError::ConfigError(_)
    ));
    assert!(matches!(
        load("[job.unit\nscript = 1").unwrap_err(),
        PipelineError::TomlError(_)
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_and_validate(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, PipelineError::IoError(_)));
}

#[test]
fn default_stages_apply_when_omitted() -> TestResult {
    let pipeline = load(
        r#"
[job.unit]
script = ["true"]
"#,
    )?;
    assert_eq!(
        pipeline.stages,
        vec![".pre", "build", "test", "deploy", ".post"]
    );
    Ok(())
}
