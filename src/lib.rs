// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod job;
pub mod logging;
pub mod store;
pub mod types;

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::PipelineFile;
use crate::dag::{select, BuildOptions, DependencyGraph, Scheduler, Selection};
use crate::engine::{CoreRuntime, PipelineResult, Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::{ShellExecutorBackend, ShellOptions};
use crate::job::{JobName, MatrixExpander};
use crate::store::LocalStore;
use crate::types::{SchedulingMode, When};

/// Everything that shapes the plan besides the pipeline file.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub mode: SchedulingMode,
    /// `--manual` jobs.
    pub manual: HashSet<String>,
    pub selection: Selection,
    /// `--variable KEY=VALUE` overrides.
    pub overrides: BTreeMap<String, String>,
}

/// Validated graph plus the jobs selected to run, in declaration order.
#[derive(Debug, Clone)]
pub struct Plan {
    pub graph: DependencyGraph,
    pub jobs: Vec<JobName>,
}

/// Resolve, expand, validate and select: everything before execution.
///
/// Explicitly targeted jobs count as authorized manual jobs.
pub fn plan_pipeline(pipeline: &PipelineFile, options: &PlanOptions) -> errors::Result<Plan> {
    let descriptors = pipeline.job_descriptors(&options.overrides)?;
    let expanded = MatrixExpander::expand_all(descriptors);

    let mut manual = options.manual.clone();
    manual.extend(options.selection.targets.iter().cloned());

    let graph = DependencyGraph::build(
        expanded,
        &pipeline.stages,
        &BuildOptions {
            mode: options.mode,
            manual,
        },
    )?;
    let jobs = select(&graph, &options.selection)?;

    debug!(jobs = jobs.len(), "plan ready");
    Ok(Plan { graph, jobs })
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - pipeline loading and planning
/// - scheduler / core / runtime
/// - shell executor and artifact store
/// - Ctrl-C handling
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let path = PathBuf::from(&args.file);
    let pipeline = load_and_validate(&path)?;

    let options = PlanOptions {
        mode: SchedulingMode::from_needs_flag(args.needs),
        manual: args.manual.iter().cloned().collect(),
        selection: Selection {
            targets: args.jobs.clone(),
            stage: args.stage.clone(),
        },
        overrides: args.variable_overrides(),
    };
    let plan = plan_pipeline(&pipeline, &options)?;

    if args.list {
        print_plan(&plan);
        return Ok(0);
    }

    let workdir = match &args.cwd {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    info!(
        file = %path.display(),
        workdir = %workdir.display(),
        jobs = plan.jobs.len(),
        "running pipeline"
    );

    let scheduler = Scheduler::new(plan.graph, plan.jobs, args.concurrency);

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let shell = ShellOptions {
        shell: args.shell.clone(),
        ..ShellOptions::new(&workdir)
    };
    let executor = ShellExecutorBackend::new(rt_tx.clone(), shell);
    let store = LocalStore::new(&workdir);

    // Ctrl-C → cancel the run.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::CancelRequested).await;
        });
    }

    let core = CoreRuntime::new(scheduler, RuntimeOptions::default());
    let runtime = Runtime::new(core, rt_tx, rt_rx, executor, store);
    let result = runtime.run().await?;

    print_summary(&result);
    Ok(result.exit_code())
}

/// `--list` output: the expanded plan grouped by stage.
fn print_plan(plan: &Plan) {
    let graph = &plan.graph;
    let mode = match graph.mode() {
        SchedulingMode::Stages => "stages",
        SchedulingMode::Needs => "needs",
    };
    println!("localci plan ({} jobs, {} mode)", plan.jobs.len(), mode);

    for stage in graph.stages() {
        let jobs: Vec<_> = plan
            .jobs
            .iter()
            .filter_map(|name| graph.descriptor(name))
            .filter(|d| d.stage == *stage)
            .collect();
        if jobs.is_empty() {
            continue;
        }

        println!("{stage}:");
        for job in jobs {
            let mut notes = Vec::new();
            if job.when != When::OnSuccess {
                notes.push(format!("when: {}", job.when));
            }
            if job.allow_failure {
                notes.push("allow_failure".to_string());
            }
            if job.retry.max > 0 {
                notes.push(format!("retry: {}", job.retry.max));
            }
            if let Some(needs) = graph.needs_of(&job.name) {
                let names: Vec<_> = needs.iter().map(|n| n.job.as_str()).collect();
                notes.push(format!("needs: [{}]", names.join(", ")));
            }

            if notes.is_empty() {
                println!("  - {}", job.name);
            } else {
                println!("  - {} ({})", job.name, notes.join("; "));
            }
        }
    }

    for warning in graph.warnings() {
        println!("warning: {warning}");
    }
}

fn print_summary(result: &PipelineResult) {
    println!();
    for stage in result.stages.iter() {
        println!("{}: {}", stage.name, stage.status);
        for name in stage.jobs.iter() {
            let Some(job) = result.job(name) else {
                continue;
            };

            let mut details = Vec::new();
            if let Some(code) = job.exit_code.filter(|c| *c != 0) {
                details.push(format!("exit code {code}"));
            }
            if job.attempts > 1 {
                details.push(format!("{} attempts", job.attempts));
            }
            if let Some(reason) = job.skip_reason {
                details.push(reason.to_string());
            }
            if let Some(coverage) = job.coverage {
                details.push(format!("coverage {coverage:.2}%"));
            }
            if let Some(duration) = job.duration {
                details.push(format!("{:.1}s", duration.as_secs_f64()));
            }

            if details.is_empty() {
                println!("  {:<9} {}", job.status, job.name);
            } else {
                println!("  {:<9} {} ({})", job.status, job.name, details.join(", "));
            }
        }
    }
    println!("pipeline {}", result.status);
}
