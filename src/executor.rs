//! The pipeline launcher: turns a parsed pipeline into a job with one
//! process per stage, wired together with pipes.
//!
//! SIGCHLD stays blocked from job creation until the foreground wait
//! finishes, so no status report can race with job setup.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::ast::{CommandLine, Pipeline, Stage};
use crate::builtins;
use crate::jobs::JobRegistry;
use crate::reaper;
use crate::signals::SigchldBlocked;
use crate::termstate::TermState;

/// Run every pipeline on a parsed line, left to right.
pub fn run_command_line(
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    line: CommandLine,
) {
    for pipeline in line.pipelines {
        launch(registry, term, out, pipeline);
    }
}

/// Launch one pipeline as a job and, if it is a foreground job, wait for it.
pub fn launch(
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    pipeline: Pipeline,
) {
    let guard = match SigchldBlocked::new() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("conch: failed to block SIGCHLD: {err}");
            return;
        }
    };

    // The job owns the pipeline from here on; keep what the spawn loop needs.
    let stages = pipeline.stages.clone();
    let input_file = pipeline.input_file.clone();
    let output_file = pipeline.output_file.clone();
    let append_output = pipeline.append_output;
    let background = pipeline.background;
    let job_id = registry.create(pipeline);

    // One pipe per adjacent stage pair.
    let pipes: std::io::Result<Vec<_>> = (1..stages.len()).map(|_| os_pipe::pipe()).collect();
    let pipes = match pipes {
        Ok(pipes) => pipes,
        Err(err) => {
            eprintln!("conch: failed to create pipe: {err}");
            reaper::wait_for_job(registry, term, out, job_id);
            return;
        }
    };

    let last = stages.len() - 1;
    for (i, stage) in stages.iter().enumerate() {
        if builtins::is_job_builtin(stage.program()) {
            builtins::run(&stage.argv, registry, term, out, job_id);
            // A waiting builtin (fg) sweeps finished jobs, which can reclaim
            // this pipeline's own job; no further stage can be registered.
            if registry.get(job_id).is_none() {
                break;
            }
            continue;
        }
        if let Err(err) = spawn_stage(
            registry,
            term,
            out,
            job_id,
            stage,
            SpawnWiring {
                index: i,
                last,
                pipes: &pipes,
                input_file: input_file.as_deref(),
                output_file: output_file.as_deref(),
                append_output,
                background,
            },
        ) {
            // A failed stage does not abort the rest of the pipeline.
            eprintln!("conch: {}: {err}", stage.program());
        }
    }

    // Children hold their own ends; dropping ours lets EOF propagate.
    drop(pipes);

    reaper::wait_for_job(registry, term, out, job_id);
    drop(guard);
}

struct SpawnWiring<'a> {
    index: usize,
    last: usize,
    pipes: &'a [(os_pipe::PipeReader, os_pipe::PipeWriter)],
    input_file: Option<&'a str>,
    output_file: Option<&'a str>,
    append_output: bool,
    background: bool,
}

/// Spawn one external stage with its descriptor wiring and process-group
/// placement, and register it with the job.
fn spawn_stage(
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    job_id: usize,
    stage: &Stage,
    wiring: SpawnWiring<'_>,
) -> std::io::Result<()> {
    let mut command = Command::new(stage.program());
    command.args(&stage.argv[1..]);

    // stdin: pipeline input file for the first stage, incoming pipe otherwise.
    if wiring.index == 0 {
        if let Some(path) = wiring.input_file {
            command.stdin(File::open(path)?);
        }
    } else {
        command.stdin(wiring.pipes[wiring.index - 1].0.try_clone()?);
    }

    // stdout (and optionally stderr): output file for the last stage,
    // outgoing pipe otherwise.
    if wiring.index == wiring.last {
        if let Some(path) = wiring.output_file {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .append(wiring.append_output)
                .truncate(!wiring.append_output)
                .open(path)?;
            if stage.dup_stderr_to_stdout {
                command.stderr(file.try_clone()?);
            }
            command.stdout(file);
        }
    } else {
        let pipe_writer = wiring.pipes[wiring.index].1.try_clone()?;
        if stage.dup_stderr_to_stdout {
            command.stderr(pipe_writer.try_clone()?);
        }
        command.stdout(pipe_writer);
    }

    // First successful spawn creates the job's process group; later stages
    // join it.
    let pgid = registry.get(job_id).map(|job| job.pgid).unwrap_or(0);
    command.process_group(pgid);

    // The shell ignores the job-control keys and blocks SIGCHLD while
    // spawning; children must start with a clean slate.
    unsafe {
        command.pre_exec(|| {
            // Async-signal-safe only: raw signal and mask calls.
            unsafe {
                libc::signal(libc::SIGTSTP, libc::SIG_DFL);
                libc::signal(libc::SIGQUIT, libc::SIG_DFL);
                libc::signal(libc::SIGPIPE, libc::SIG_DFL);
                let mut empty: libc::sigset_t = std::mem::zeroed();
                libc::sigemptyset(&mut empty);
                libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
            }
            Ok(())
        });
    }

    let child = command.spawn()?;
    let pid = child.id() as libc::pid_t;

    if pgid == 0 {
        let job = registry
            .get_mut(job_id)
            .expect("job reclaimed during launch");
        job.pgid = pid;
        if wiring.background {
            let _ = writeln!(out, "[{job_id}] {pid}");
        } else {
            // The group exists now; hand it the terminal before any member
            // can try to read it.
            let _ = term.give_terminal_to(None, pid);
        }
    }
    registry.add_member(job_id, pid);
    Ok(())
}
