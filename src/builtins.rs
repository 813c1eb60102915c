//! Builtins that mutate job and terminal state: `jobs`, `fg`, `bg`, `stop`,
//! `kill`, plus `exit`.
//!
//! `fg` and `bg` update the job's status the moment the command is issued,
//! before the kernel confirms the continue signal took effect; the reaper
//! reconciles the recorded status when the next report arrives.

use std::io::Write;

use crate::jobs::{JobRegistry, JobStatus};
use crate::reaper;
use crate::signals;
use crate::termstate::TermState;

/// The job-control builtins that run in the shell's own execution context
/// instead of being spawned.
const JOB_BUILTINS: &[&str] = &["jobs", "fg", "bg", "stop", "kill", "exit"];

pub fn is_job_builtin(name: &str) -> bool {
    JOB_BUILTINS.contains(&name)
}

/// Execute a builtin. `self_job` is the job the launcher created for the
/// builtin's own pipeline; job-id arguments must resolve to a different job.
pub fn run(
    argv: &[String],
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    self_job: usize,
) {
    match argv[0].as_str() {
        "jobs" => jobs_builtin(registry, out),
        "fg" => fg_builtin(argv, registry, term, out, self_job),
        "bg" => bg_builtin(argv, registry, term, out, self_job),
        "stop" => signal_builtin("stop", argv, registry, out, self_job, libc::SIGSTOP),
        "kill" => signal_builtin("kill", argv, registry, out, self_job, libc::SIGTERM),
        "exit" => exit_builtin(argv),
        other => eprintln!("conch: unknown builtin: {other}"),
    }
}

/// List every live job except the sentinel job a builtin pipeline runs under
/// (recognizable by its unassigned process group).
fn jobs_builtin(registry: &JobRegistry, out: &mut dyn Write) {
    for job in registry.live_jobs() {
        if job.pgid != 0 {
            let _ = writeln!(out, "{}", job.describe());
        }
    }
}

/// Resume a stopped job in the foreground and wait for it.
fn fg_builtin(
    argv: &[String],
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    self_job: usize,
) {
    let Some(id) = resolve_job_id("fg", argv, registry, out, self_job) else {
        return;
    };

    let job = registry.get_mut(id).expect("job resolved but absent");
    job.status = JobStatus::Foreground;
    let _ = writeln!(out, "{}", job.pipeline.command_line());

    // Restore the attributes captured when the job last held the terminal;
    // a job that never held it gets the terminal as-is.
    let saved_state = job.saved_tty_state;
    let pgid = job.pgid;
    let _ = term.give_terminal_to(saved_state.as_ref(), pgid);

    if let Err(err) = signals::signal_group(pgid, libc::SIGCONT) {
        eprintln!("conch: fg: {err}");
    }
    reaper::wait_for_job(registry, term, out, id);
}

/// Resume a stopped job in the background. Does not wait.
fn bg_builtin(
    argv: &[String],
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    self_job: usize,
) {
    let Some(id) = resolve_job_id("bg", argv, registry, out, self_job) else {
        return;
    };

    let job = registry.get_mut(id).expect("job resolved but absent");
    job.status = JobStatus::Background;
    let _ = writeln!(out, "[{}] {}", job.id, job.pgid);
    let pgid = job.pgid;

    let _ = term.give_terminal_back_to_shell();
    if let Err(err) = signals::signal_group(pgid, libc::SIGCONT) {
        eprintln!("conch: bg: {err}");
    }
}

/// Shared body of `stop` and `kill`: validate the id, signal the group, and
/// let the reaper record the resulting status change.
fn signal_builtin(
    name: &str,
    argv: &[String],
    registry: &mut JobRegistry,
    out: &mut dyn Write,
    self_job: usize,
    signal: libc::c_int,
) {
    let Some(id) = resolve_job_id(name, argv, registry, out, self_job) else {
        return;
    };

    let pgid = registry.get(id).expect("job resolved but absent").pgid;
    if let Err(err) = signals::signal_group(pgid, signal) {
        eprintln!("conch: {name}: {err}");
    }
}

fn exit_builtin(argv: &[String]) -> ! {
    let code = argv
        .get(1)
        .and_then(|arg| arg.parse::<i32>().ok())
        .unwrap_or(0);
    std::process::exit(code);
}

/// Parse and validate a job-id argument.
///
/// The id must resolve to a different, existing job: ids that are absent,
/// reclaimed, or equal to the invoking builtin's own job all report
/// "No such job".
fn resolve_job_id(
    name: &str,
    argv: &[String],
    registry: &JobRegistry,
    out: &mut dyn Write,
    self_job: usize,
) -> Option<usize> {
    let Some(arg) = argv.get(1) else {
        let _ = writeln!(out, "{name}: job id required");
        return None;
    };
    let Ok(id) = arg.trim_start_matches('%').parse::<usize>() else {
        let _ = writeln!(out, "{name} {arg}: No such job");
        return None;
    };

    if registry.get(id).is_none() || id == self_job {
        let _ = writeln!(out, "{name} {id}: No such job");
        return None;
    }
    Some(id)
}
