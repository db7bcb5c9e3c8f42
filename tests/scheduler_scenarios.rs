// tests/scheduler_scenarios.rs

use std::time::Duration;

use localci::dag::{JobStatus, Scheduler, SchedulerStep, SkipReason};
use localci::engine::{JobCompletion, PipelineResult, PipelineStatus};
use localci::types::When;
use localci_test_utils::builders::{JobBuilder, PipelineBuilder};
use localci_test_utils::init_tracing;

/// Report the outcome of the current attempt of `job`.
fn finish(s: &mut Scheduler, job: &str, completion: JobCompletion) -> SchedulerStep {
    let attempt = s.job(job).map(|info| info.attempt).unwrap_or(0);
    s.handle_completion(job, attempt, completion)
}

fn result(s: &Scheduler) -> PipelineResult {
    PipelineResult::reduce(s.graph().stages(), s.jobs())
}

fn status(s: &Scheduler, job: &str) -> JobStatus {
    s.status_of(job).expect("job should be part of the run")
}

#[test]
fn stage_barrier_holds_later_stage_until_earlier_drains() {
    init_tracing();
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .job(JobBuilder::new("b1", "build"))
        .job(JobBuilder::new("b2", "build"))
        .job(JobBuilder::new("b3", "build"))
        .job(JobBuilder::new("t1", "test"))
        .scheduler(4);

    let step = s.start();
    assert_eq!(step.dispatched_names(), vec!["b1", "b2", "b3"]);
    assert_eq!(status(&s, "t1"), JobStatus::Pending);
    assert_eq!(s.deps_satisfied("t1"), Some(false));

    assert!(finish(&mut s, "b2", JobCompletion::success()).dispatched.is_empty());
    assert!(finish(&mut s, "b1", JobCompletion::success()).dispatched.is_empty());

    let step = finish(&mut s, "b3", JobCompletion::success());
    assert_eq!(step.dispatched_names(), vec!["t1"]);
    assert_eq!(s.deps_satisfied("t1"), Some(true));

    let step = finish(&mut s, "t1", JobCompletion::success());
    assert!(step.run_just_finished);
    assert!(s.is_finished());
    assert_eq!(result(&s).status, PipelineStatus::Success);
}

#[test]
fn stages_mode_ignores_needs_for_ordering() {
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("docs", "build"))
        .job(JobBuilder::new("unit", "test").needs("compile"))
        .scheduler(4);

    s.start();
    finish(&mut s, "compile", JobCompletion::success());
    // `docs` is still running, so the stage barrier still holds.
    assert_eq!(status(&s, "unit"), JobStatus::Pending);

    let step = finish(&mut s, "docs", JobCompletion::success());
    assert_eq!(step.dispatched_names(), vec!["unit"]);
}

#[test]
fn needs_mode_starts_dependents_as_soon_as_needs_finish() {
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .needs_mode()
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("docs", "build"))
        .job(JobBuilder::new("unit", "test").needs("compile"))
        .job(JobBuilder::new("lint", "test").no_needs())
        .scheduler(4);

    let step = s.start();
    assert_eq!(step.dispatched_names(), vec!["compile", "docs", "lint"]);

    let step = finish(&mut s, "compile", JobCompletion::success());
    assert_eq!(step.dispatched_names(), vec!["unit"]);
    assert_eq!(status(&s, "docs"), JobStatus::Running);
}

#[test]
fn needs_mode_job_without_needs_key_keeps_stage_barrier() {
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .needs_mode()
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("unit", "test"))
        .scheduler(4);

    let step = s.start();
    assert_eq!(step.dispatched_names(), vec!["compile"]);
    let step = finish(&mut s, "compile", JobCompletion::success());
    assert_eq!(step.dispatched_names(), vec!["unit"]);
}

#[test]
fn concurrency_one_runs_in_declaration_order() {
    let mut s = PipelineBuilder::with_stages(&["build"])
        .job(JobBuilder::new("c", "build"))
        .job(JobBuilder::new("a", "build"))
        .job(JobBuilder::new("b", "build"))
        .scheduler(1);

    let mut order = Vec::new();
    let mut step = s.start();
    while let Some(job) = step.dispatched.first().map(|j| j.name.clone()) {
        assert_eq!(step.dispatched.len(), 1);
        assert_eq!(s.in_flight(), 1);
        order.push(job.clone());
        step = finish(&mut s, &job, JobCompletion::success());
    }

    assert_eq!(order, vec!["c", "a", "b"]);
    assert!(s.is_finished());
}

#[test]
fn earlier_ready_job_runs_before_later_ready_job_declared_first() {
    let mut s = PipelineBuilder::with_stages(&["test"])
        .needs_mode()
        .job(JobBuilder::new("late", "test").needs("x"))
        .job(JobBuilder::new("x", "test").no_needs())
        .job(JobBuilder::new("early", "test").no_needs())
        .scheduler(1);

    assert_eq!(s.start().dispatched_names(), vec!["x"]);

    // `late` is declared first but only became ready now.
    let step = finish(&mut s, "x", JobCompletion::success());
    assert_eq!(step.dispatched_names(), vec!["early"]);
    assert_eq!(status(&s, "late"), JobStatus::Ready);

    let step = finish(&mut s, "early", JobCompletion::success());
    assert_eq!(step.dispatched_names(), vec!["late"]);
}

#[test]
fn zero_concurrency_is_clamped_to_one() {
    let mut s = PipelineBuilder::with_stages(&["build"])
        .job(JobBuilder::new("a", "build"))
        .job(JobBuilder::new("b", "build"))
        .scheduler(0);

    assert_eq!(s.concurrency(), 1);
    assert_eq!(s.start().dispatched_names(), vec!["a"]);
}

#[test]
fn failure_only_affects_dependents() {
    init_tracing();
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .needs_mode()
        .job(JobBuilder::new("a", "build"))
        .job(JobBuilder::new("b", "test").needs("a"))
        .job(JobBuilder::new("c", "test").no_needs())
        .scheduler(4);

    assert_eq!(s.start().dispatched_names(), vec!["a", "c"]);

    let step = finish(&mut s, "a", JobCompletion::failed(1));
    assert!(step.dispatched.is_empty());
    assert_eq!(status(&s, "b"), JobStatus::Skipped);
    assert_eq!(
        s.job("b").and_then(|i| i.skip_reason),
        Some(SkipReason::UpstreamFailed)
    );
    assert_eq!(status(&s, "c"), JobStatus::Running);

    finish(&mut s, "c", JobCompletion::success());
    assert!(s.is_finished());

    let res = result(&s);
    assert_eq!(res.status, PipelineStatus::Failed);
    assert_eq!(res.exit_code(), 1);
    assert_eq!(res.job("a").and_then(|j| j.exit_code), Some(1));
    assert_eq!(res.job("c").map(|j| j.status), Some(JobStatus::Success));
    let failed: Vec<_> = res.failed_jobs().map(|j| j.name.as_str()).collect();
    assert_eq!(failed, vec!["a"]);
}

#[test]
fn skip_propagates_through_the_whole_chain() {
    let mut s = PipelineBuilder::with_stages(&["build", "test", "deploy"])
        .needs_mode()
        .job(JobBuilder::new("a", "build"))
        .job(JobBuilder::new("b", "test").needs("a"))
        .job(JobBuilder::new("c", "deploy").needs("b"))
        .scheduler(2);

    s.start();
    let step = finish(&mut s, "a", JobCompletion::failed(2));
    assert!(step.run_just_finished);
    assert_eq!(status(&s, "b"), JobStatus::Skipped);
    assert_eq!(status(&s, "c"), JobStatus::Skipped);
    assert_eq!(
        s.job("c").and_then(|i| i.skip_reason),
        Some(SkipReason::UpstreamFailed)
    );
}

#[test]
fn retry_redispatches_until_success() {
    let mut s = PipelineBuilder::with_stages(&["test"])
        .job(JobBuilder::new("flaky", "test").retry(2))
        .scheduler(1);

    let step = s.start();
    assert_eq!(step.dispatched[0].attempt, 1);

    let step = finish(&mut s, "flaky", JobCompletion::failed(1));
    assert_eq!(step.dispatched.len(), 1);
    assert_eq!(step.dispatched[0].attempt, 2);
    assert_eq!(status(&s, "flaky"), JobStatus::Running);
    assert_eq!(s.in_flight(), 1);

    let step = finish(&mut s, "flaky", JobCompletion::failed(1));
    assert_eq!(step.dispatched[0].attempt, 3);

    finish(&mut s, "flaky", JobCompletion::success());
    let res = result(&s);
    assert_eq!(res.status, PipelineStatus::Success);
    assert_eq!(res.job("flaky").map(|j| j.attempts), Some(3));
}

#[test]
fn retry_budget_is_bounded() {
    let mut s = PipelineBuilder::with_stages(&["test"])
        .job(JobBuilder::new("broken", "test").retry(1))
        .scheduler(1);

    s.start();
    assert_eq!(finish(&mut s, "broken", JobCompletion::failed(3)).dispatched.len(), 1);
    let step = finish(&mut s, "broken", JobCompletion::failed(3));
    assert!(step.dispatched.is_empty());
    assert_eq!(status(&s, "broken"), JobStatus::Failed);
    assert_eq!(s.job("broken").map(|i| i.attempt), Some(2));
}

#[test]
fn retry_only_on_listed_exit_codes() {
    let mut s = PipelineBuilder::with_stages(&["test"])
        .job(JobBuilder::new("oom", "test").retry_on(2, &[137]))
        .job(JobBuilder::new("bug", "test").retry_on(2, &[137]))
        .scheduler(2);

    s.start();
    let step = finish(&mut s, "oom", JobCompletion::failed(137));
    assert_eq!(step.dispatched_names(), vec!["oom"]);

    let step = finish(&mut s, "bug", JobCompletion::failed(1));
    assert!(step.dispatched.is_empty());
    assert_eq!(status(&s, "bug"), JobStatus::Failed);
    assert_eq!(s.job("bug").map(|i| i.attempt), Some(1));
}

#[test]
fn stale_completion_is_ignored() {
    let mut s = PipelineBuilder::with_stages(&["test"])
        .job(JobBuilder::new("flaky", "test").retry(1))
        .scheduler(1);

    s.start();
    finish(&mut s, "flaky", JobCompletion::failed(1));
    // A late report for attempt 1 must not settle attempt 2.
    let step = s.handle_completion("flaky", 1, JobCompletion::success());
    assert!(step.transitions.is_empty());
    assert_eq!(status(&s, "flaky"), JobStatus::Running);
}

#[test]
fn allowed_failure_is_a_warning_and_does_not_block() {
    let mut s = PipelineBuilder::with_stages(&["test", "deploy"])
        .job(JobBuilder::new("lint", "test").allow_failure())
        .job(JobBuilder::new("ship", "deploy"))
        .scheduler(2);

    s.start();
    let step = finish(&mut s, "lint", JobCompletion::failed(1));
    assert_eq!(status(&s, "lint"), JobStatus::Warning);
    assert_eq!(step.dispatched_names(), vec!["ship"]);

    finish(&mut s, "ship", JobCompletion::success());
    let res = result(&s);
    assert_eq!(res.status, PipelineStatus::PartialFailure);
    assert_eq!(res.exit_code(), 0);
    assert_eq!(
        res.stage("test").map(|st| st.status),
        Some(PipelineStatus::PartialFailure)
    );
    assert_eq!(
        res.stage("deploy").map(|st| st.status),
        Some(PipelineStatus::Success)
    );
}

#[test]
fn on_failure_and_always_jobs_run_after_a_failure() {
    let mut s = PipelineBuilder::with_stages(&["build", "cleanup"])
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("rollback", "cleanup").when(When::OnFailure))
        .job(JobBuilder::new("report", "cleanup").when(When::Always))
        .job(JobBuilder::new("ship", "cleanup"))
        .scheduler(4);

    s.start();
    let step = finish(&mut s, "compile", JobCompletion::failed(1));
    assert_eq!(step.dispatched_names(), vec!["rollback", "report"]);
    assert_eq!(status(&s, "ship"), JobStatus::Skipped);

    finish(&mut s, "rollback", JobCompletion::success());
    finish(&mut s, "report", JobCompletion::success());
    assert!(s.is_finished());
    assert_eq!(result(&s).status, PipelineStatus::Failed);
}

#[test]
fn on_failure_job_is_skipped_when_nothing_failed() {
    let mut s = PipelineBuilder::with_stages(&["build", "cleanup"])
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("rollback", "cleanup").when(When::OnFailure))
        .scheduler(2);

    s.start();
    let step = finish(&mut s, "compile", JobCompletion::success());
    assert!(step.dispatched.is_empty());
    assert!(step.run_just_finished);
    assert_eq!(
        s.job("rollback").and_then(|i| i.skip_reason),
        Some(SkipReason::WhenNotMet)
    );
    assert_eq!(result(&s).status, PipelineStatus::Success);
}

#[test]
fn never_job_is_skipped_up_front() {
    let mut s = PipelineBuilder::with_stages(&["build"])
        .job(JobBuilder::new("disabled", "build").when(When::Never))
        .job(JobBuilder::new("compile", "build"))
        .scheduler(2);

    let step = s.start();
    assert_eq!(step.dispatched_names(), vec!["compile"]);
    assert_eq!(
        s.job("disabled").and_then(|i| i.skip_reason),
        Some(SkipReason::Never)
    );
}

#[test]
fn unauthorized_manual_job_parks_without_blocking_later_stages() {
    let mut s = PipelineBuilder::with_stages(&["build", "deploy", "notify"])
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("release", "deploy").when(When::Manual))
        .job(JobBuilder::new("announce", "notify"))
        .scheduler(2);

    let step = s.start();
    assert_eq!(step.dispatched_names(), vec!["compile"]);
    assert_eq!(status(&s, "release"), JobStatus::ManualBlocked);

    let step = finish(&mut s, "compile", JobCompletion::success());
    assert_eq!(step.dispatched_names(), vec!["announce"]);

    finish(&mut s, "announce", JobCompletion::success());
    assert!(s.is_finished());
    let res = result(&s);
    assert_eq!(res.status, PipelineStatus::Success);
    assert_eq!(res.job("release").map(|j| j.status), Some(JobStatus::ManualBlocked));
}

#[test]
fn authorized_manual_job_runs() {
    let mut s = PipelineBuilder::with_stages(&["deploy"])
        .authorize("release")
        .job(JobBuilder::new("release", "deploy").when(When::Manual))
        .scheduler(1);

    assert_eq!(s.start().dispatched_names(), vec!["release"]);
}

#[test]
fn delayed_job_waits_for_its_timer() {
    let mut s = PipelineBuilder::with_stages(&["build", "deploy"])
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("canary", "deploy").delayed(Duration::from_secs(30)))
        .scheduler(2);

    s.start();
    let step = finish(&mut s, "compile", JobCompletion::success());
    assert!(step.dispatched.is_empty());
    assert_eq!(step.delays, vec![("canary".to_string(), Duration::from_secs(30))]);
    assert!(!s.is_finished());

    let step = s.handle_delay_elapsed("canary");
    assert_eq!(step.dispatched_names(), vec!["canary"]);
}

#[test]
fn delayed_job_after_failure_is_skipped_without_timer() {
    let mut s = PipelineBuilder::with_stages(&["build", "deploy"])
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("canary", "deploy").delayed(Duration::from_secs(30)))
        .scheduler(2);

    s.start();
    let step = finish(&mut s, "compile", JobCompletion::failed(1));
    assert!(step.delays.is_empty());
    assert_eq!(status(&s, "canary"), JobStatus::Skipped);
    assert!(s.is_finished());
}

#[test]
fn cancel_stops_pending_and_asks_running_to_stop() {
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .job(JobBuilder::new("compile", "build").retry(2))
        .job(JobBuilder::new("unit", "test"))
        .scheduler(2);

    s.start();
    let step = s.cancel();
    assert_eq!(step.cancels, vec!["compile".to_string()]);
    assert_eq!(status(&s, "unit"), JobStatus::Canceled);
    assert!(!s.is_finished());

    // Second cancel is a no-op.
    assert!(s.cancel().cancels.is_empty());

    // A failure after cancel is not retried.
    let step = finish(&mut s, "compile", JobCompletion::failed(143));
    assert!(step.dispatched.is_empty());
    assert!(s.is_finished());
    assert_eq!(result(&s).status, PipelineStatus::Failed);
}

#[test]
fn canceled_run_reports_canceled() {
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("unit", "test"))
        .scheduler(1);

    s.start();
    s.cancel();
    let step = finish(&mut s, "compile", JobCompletion::canceled());
    assert!(step.exports.is_empty());
    assert!(s.is_finished());

    let res = result(&s);
    assert_eq!(res.status, PipelineStatus::Canceled);
    assert_eq!(res.exit_code(), 1);
}

#[test]
fn completion_exports_before_dependents_dispatch() {
    let mut s = PipelineBuilder::with_stages(&["build", "test"])
        .needs_mode()
        .job(JobBuilder::new("compile", "build"))
        .job(JobBuilder::new("unit", "test").needs("compile"))
        .scheduler(2);

    s.start();
    let step = finish(&mut s, "compile", JobCompletion::success());
    assert_eq!(step.exports.len(), 1);
    assert!(step.exports[0].script_succeeded);
    assert_eq!(step.dispatched[0].artifact_sources, vec!["compile".to_string()]);
}

#[test]
fn coverage_is_recorded_on_the_report() {
    let mut s = PipelineBuilder::with_stages(&["test"])
        .job(JobBuilder::new("unit", "test"))
        .scheduler(1);

    s.start();
    finish(
        &mut s,
        "unit",
        JobCompletion::success().with_coverage(Some(87.5)),
    );
    assert_eq!(result(&s).job("unit").and_then(|j| j.coverage), Some(87.5));
}
