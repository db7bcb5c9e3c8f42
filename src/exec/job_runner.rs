// src/exec/job_runner.rs

//! One attempt of one job: run the script, stream its output, report back.

use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledJob;
use crate::engine::{
    JobCompletion, JobOutcome, RuntimeEvent, EXIT_CODE_EXECUTOR_ERROR, EXIT_CODE_TIMEOUT,
};
use crate::exec::executor_loop::ShellOptions;

/// Upper bound for `after_script`, which has no configurable timeout.
const AFTER_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long output readers may keep draining once the script was killed.
/// A process that left the job's process group can hold the pipes open.
const KILLED_OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Run one attempt of `job` and send exactly one `JobCompleted` event.
///
/// Errors launching the script are reported as a failure with
/// [`EXIT_CODE_EXECUTOR_ERROR`]; an unusable working directory is reported
/// as [`JobOutcome::Fatal`].
pub async fn run_job(
    job: ScheduledJob,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    cancel_rx: oneshot::Receiver<()>,
    options: ShellOptions,
) {
    let completion = match run_job_inner(&job, &options, cancel_rx).await {
        Ok(completion) => completion,
        Err(err) => {
            error!(
                job = %job.name,
                attempt = job.attempt,
                error = %err,
                "job execution error"
            );
            JobCompletion::failed(EXIT_CODE_EXECUTOR_ERROR)
        }
    };

    let event = RuntimeEvent::JobCompleted {
        job: job.name.clone(),
        attempt: job.attempt,
        completion,
    };
    if runtime_tx.send(event).await.is_err() {
        debug!(job = %job.name, "runtime gone; dropping completion");
    }
}

async fn run_job_inner(
    job: &ScheduledJob,
    options: &ShellOptions,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<JobCompletion> {
    if !options.workdir.is_dir() {
        return Ok(JobCompletion::new(JobOutcome::Fatal(format!(
            "working directory {} does not exist",
            options.workdir.display()
        ))));
    }

    let env = job_environment(job);
    let coverage_re = coverage_regex(job);

    info!(
        job = %job.name,
        attempt = job.attempt,
        stage = %job.descriptor.stage,
        "starting job script"
    );

    let mut child = shell_command(options, &job.descriptor.script, &env)
        .spawn()
        .with_context(|| format!("spawning shell for job '{}'", job.name))?;

    let readers = attach_output(job, &mut child, coverage_re);

    let deadline = async {
        match job.descriptor.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    // Either the script exits on its own, the run is canceled, or the job's
    // timeout expires.
    let (outcome, killed) = tokio::select! {
        status_res = child.wait() => {
            let status = status_res
                .with_context(|| format!("waiting for script of job '{}'", job.name))?;
            (outcome_from_status(status), false)
        }

        _ = &mut cancel_rx => {
            info!(job = %job.name, attempt = job.attempt, "cancellation requested; killing script");
            kill(job, &mut child).await;
            (JobOutcome::Canceled, true)
        }

        _ = &mut deadline => {
            warn!(
                job = %job.name,
                attempt = job.attempt,
                timeout = ?job.descriptor.timeout,
                "job timed out; killing script"
            );
            kill(job, &mut child).await;
            (JobOutcome::Failed(EXIT_CODE_TIMEOUT), true)
        }
    };

    let grace = killed.then_some(KILLED_OUTPUT_GRACE);
    let coverage = collect_coverage(readers, grace).await;

    info!(
        job = %job.name,
        attempt = job.attempt,
        outcome = ?outcome,
        "job script finished"
    );

    if outcome != JobOutcome::Canceled && !job.descriptor.after_script.is_empty() {
        run_after_script(job, options, &env).await;
    }

    Ok(JobCompletion::new(outcome).with_coverage(coverage))
}

fn outcome_from_status(status: ExitStatus) -> JobOutcome {
    if status.success() {
        JobOutcome::Success
    } else {
        // Killed by a signal: no exit code.
        JobOutcome::Failed(status.code().unwrap_or(EXIT_CODE_EXECUTOR_ERROR))
    }
}

/// Kill the script together with everything it started.
async fn kill(job: &ScheduledJob, child: &mut Child) {
    kill_process_group(job, child);
    if let Err(e) = child.kill().await {
        warn!(job = %job.name, error = %e, "failed to kill script process");
    }
}

/// `shell_command` makes the shell a process group leader, so its pid is
/// also the group id.
#[cfg(unix)]
fn kill_process_group(job: &ScheduledJob, child: &Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: killpg only sends a signal; no memory is shared with libc.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(
            job = %job.name,
            error = %std::io::Error::last_os_error(),
            "could not signal script process group"
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_job: &ScheduledJob, _child: &Child) {}

/// `after_script` failures are logged and never change the job outcome.
async fn run_after_script(job: &ScheduledJob, options: &ShellOptions, env: &BTreeMap<String, String>) {
    debug!(job = %job.name, "running after_script");

    let mut cmd = shell_command(options, &job.descriptor.after_script, env);
    cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(job = %job.name, error = %e, "could not start after_script");
            return;
        }
    };

    match tokio::time::timeout(AFTER_SCRIPT_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) if status.success() => {}
        Ok(Ok(status)) => {
            warn!(job = %job.name, exit_code = ?status.code(), "after_script failed");
        }
        Ok(Err(e)) => {
            warn!(job = %job.name, error = %e, "waiting for after_script failed");
        }
        Err(_) => {
            warn!(job = %job.name, "after_script timed out");
            kill(job, &mut child).await;
        }
    }
}

fn shell_command(options: &ShellOptions, lines: &[String], env: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new(&options.shell);
    cmd.arg("-e")
        .arg("-c")
        .arg(lines.join("\n"))
        .current_dir(&options.workdir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Job variables plus the predefined `CI_*` ones.
pub fn job_environment(job: &ScheduledJob) -> BTreeMap<String, String> {
    let descriptor = &job.descriptor;
    let mut env = descriptor.variables.clone();

    env.insert("CI".to_string(), "true".to_string());
    env.insert("CI_JOB_NAME".to_string(), descriptor.name.clone());
    env.insert("CI_JOB_STAGE".to_string(), descriptor.stage.clone());
    env.insert("CI_JOB_ATTEMPT".to_string(), job.attempt.to_string());
    if let Some(node) = descriptor.node {
        env.insert("CI_NODE_INDEX".to_string(), node.index.to_string());
        env.insert("CI_NODE_TOTAL".to_string(), node.total.to_string());
    }
    if let Some(environment) = &descriptor.environment {
        env.insert("CI_ENVIRONMENT_NAME".to_string(), environment.name.clone());
        if let Some(url) = &environment.url {
            env.insert("CI_ENVIRONMENT_URL".to_string(), url.clone());
        }
    }
    env
}

fn coverage_regex(job: &ScheduledJob) -> Option<Regex> {
    let pattern = job.descriptor.coverage_regex.as_deref()?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(job = %job.name, error = %e, "invalid coverage_regex; coverage disabled");
            None
        }
    }
}

/// Coverage percentage in `line`: first capture group, else the whole match.
pub fn extract_coverage(re: &Regex, line: &str) -> Option<f64> {
    let caps = re.captures(line)?;
    let text = caps.get(1).or_else(|| caps.get(0))?.as_str();
    let number: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse().ok()
}

fn attach_output(
    job: &ScheduledJob,
    child: &mut Child,
    coverage_re: Option<Regex>,
) -> Vec<JoinHandle<Option<f64>>> {
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(
            job.name.clone(),
            stdout,
            coverage_re.clone(),
            false,
        )));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(
            job.name.clone(),
            stderr,
            coverage_re,
            true,
        )));
    }
    readers
}

/// Echo a stream with a job prefix; returns the last coverage value seen.
async fn forward_lines<R>(
    name: String,
    stream: R,
    coverage_re: Option<Regex>,
    is_stderr: bool,
) -> Option<f64>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    let mut coverage = None;

    while let Ok(Some(line)) = lines.next_line().await {
        if is_stderr {
            eprintln!("[{}] {}", name, line);
        } else {
            println!("[{}] {}", name, line);
        }
        if let Some(re) = &coverage_re {
            if let Some(value) = extract_coverage(re, &line) {
                coverage = Some(value);
            }
        }
    }

    coverage
}

/// Wait for the output readers. With a `grace` period, readers still
/// blocked on an open pipe after it are aborted.
async fn collect_coverage(
    readers: Vec<JoinHandle<Option<f64>>>,
    grace: Option<Duration>,
) -> Option<f64> {
    let mut coverage = None;
    for mut reader in readers {
        let joined = match grace {
            Some(limit) => match tokio::time::timeout(limit, &mut reader).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!("output still open after kill; dropping reader");
                    reader.abort();
                    continue;
                }
            },
            None => reader.await,
        };
        match joined {
            Ok(Some(value)) => coverage = Some(value),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "output reader task failed"),
        }
    }
    coverage
}
