//! The reaper: the single authority that turns a raw `waitpid` report into a
//! job-state transition.
//!
//! It runs from exactly two places, never concurrently: the foreground wait
//! loop ([`wait_for_job`]) and the pre-prompt drain ([`drain_pending`]). Both
//! run with SIGCHLD blocked, so each status change is observed exactly once.

use std::io::{self, Write};

use crate::jobs::{Job, JobRegistry, JobStatus};
use crate::signals;
use crate::status::{self, ChildStatus};
use crate::termstate::TermState;

/// Abort the shell over a violated internal invariant.
fn fatal(message: &str) -> ! {
    eprintln!("conch: fatal: {message}");
    std::process::abort();
}

/// Apply one child-status report to the job table.
///
/// Reports for pids no job tracks are diagnosed and dropped; the
/// notification channel is allowed to be spurious.
pub fn handle_child_status(
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    pid: libc::pid_t,
    raw_status: libc::c_int,
) {
    debug_assert!(signals::sigchld_is_blocked());

    let Some(job_id) = registry.job_of_pid(pid) else {
        eprintln!("conch: status change for pid {pid} does not belong to any job");
        return;
    };
    let child_status = match ChildStatus::decode(raw_status) {
        Ok(status) => status,
        Err(err) => {
            eprintln!("conch: pid {pid}: {err}");
            return;
        }
    };
    let job = registry
        .get_mut(job_id)
        .expect("job vanished while handling its status change");

    match child_status {
        ChildStatus::Exited(code) => {
            job.alive = job.alive.saturating_sub(1);
            // A clean foreground exit left the terminal in a state worth
            // keeping; adopt it before taking the terminal back.
            if code == 0 && job.status == JobStatus::Foreground {
                term.sample();
            }
            let _ = term.give_terminal_back_to_shell();
        }
        ChildStatus::Stopped(signal) => match signal {
            // Suspended from the keyboard (Ctrl-Z).
            libc::SIGTSTP => {
                job.status = JobStatus::Stopped;
                job.saved_tty_state = term.capture();
                if job.pgid == pid {
                    let _ = writeln!(out, "{}", job.describe());
                }
                let _ = term.give_terminal_back_to_shell();
            }
            // The job touched the terminal from the background; it needs the
            // terminal to make progress. SIGTTOU and SIGTTIN are one
            // condition here, not two.
            libc::SIGTTOU | libc::SIGTTIN => {
                job.status = JobStatus::NeedsTerminal;
                promote_for_terminal_access(job, term);
            }
            // Programmatic stop (the `stop` builtin, or an outside SIGSTOP).
            // Whoever requested it already announced it.
            _ => {
                job.status = JobStatus::Stopped;
                let _ = term.give_terminal_back_to_shell();
            }
        },
        ChildStatus::Terminated(signal) => {
            job.alive = job.alive.saturating_sub(1);
            let _ = term.give_terminal_back_to_shell();
            if signal == libc::SIGINT {
                // Interactive convention: Ctrl-C prints only a fresh line.
                let _ = writeln!(out);
            } else {
                let _ = writeln!(out, "{}", status::signal_description(signal));
            }
        }
    }
}

/// Give a terminal-starved job the terminal and foreground standing.
///
/// If the transfer fails the job keeps its NeedsTerminal status and shows up
/// as "Stopped (tty)" in `jobs` output.
fn promote_for_terminal_access(job: &mut Job, term: &TermState) {
    if term
        .give_terminal_to(job.saved_tty_state.as_ref(), job.pgid)
        .is_ok()
    {
        job.status = JobStatus::Foreground;
    }
}

/// Block until `job_id` leaves the foreground-and-alive condition, routing
/// every observed status change through the reaper, then sweep finished jobs.
///
/// Must be called with SIGCHLD blocked. Any `waitpid` failure here other than
/// EINTR is a fatal inconsistency: ECHILD in particular means a child was
/// reaped somewhere the job table never heard about.
pub fn wait_for_job(
    registry: &mut JobRegistry,
    term: &mut TermState,
    out: &mut dyn Write,
    job_id: usize,
) {
    debug_assert!(signals::sigchld_is_blocked());

    while registry
        .get(job_id)
        .is_some_and(|job| job.status == JobStatus::Foreground && job.alive > 0)
    {
        let mut raw_status: libc::c_int = 0;
        let pid = loop {
            let rc = unsafe { libc::waitpid(-1, &mut raw_status, libc::WUNTRACED) };
            if rc > 0 {
                break rc;
            }

            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            fatal(&format!(
                "waitpid failed while a foreground job was outstanding: {err}"
            ));
        };
        handle_child_status(registry, term, out, pid, raw_status);
    }

    registry.reclaim_finished(out);
}

/// Drain every pending child-status report without blocking.
///
/// One SIGCHLD can stand for several children, so this loops until `waitpid`
/// has nothing more to say. Called with SIGCHLD blocked before each prompt.
pub fn drain_pending(registry: &mut JobRegistry, term: &mut TermState, out: &mut dyn Write) {
    debug_assert!(signals::sigchld_is_blocked());

    loop {
        let mut raw_status: libc::c_int = 0;
        let pid = unsafe {
            libc::waitpid(-1, &mut raw_status, libc::WUNTRACED | libc::WNOHANG)
        };
        if pid <= 0 {
            // 0: children exist but none changed state; -1: no children at
            // all. Both end the drain.
            break;
        }
        handle_child_status(registry, term, out, pid, raw_status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Pipeline, Stage};
    use crate::signals::SigchldBlocked;

    fn pipeline(cmd: &str, background: bool) -> Pipeline {
        Pipeline {
            stages: vec![Stage {
                argv: cmd.split(' ').map(String::from).collect(),
                dup_stderr_to_stdout: false,
            }],
            input_file: None,
            output_file: None,
            append_output: false,
            background,
        }
    }

    fn raw_exited(code: i32) -> libc::c_int {
        code << 8
    }

    fn raw_stopped(sig: i32) -> libc::c_int {
        (sig << 8) | 0x7f
    }

    fn raw_signaled(sig: i32) -> libc::c_int {
        sig
    }

    #[test]
    fn exit_decrements_alive_count() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("true", false));
        reg.add_member(id, 501);
        reg.add_member(id, 502);

        let mut out = Vec::new();
        handle_child_status(&mut reg, &mut term, &mut out, 501, raw_exited(1));
        assert_eq!(reg.get(id).unwrap().alive, 1);
        handle_child_status(&mut reg, &mut term, &mut out, 502, raw_exited(0));
        assert_eq!(reg.get(id).unwrap().alive, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn orphan_report_is_ignored() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("true", false));
        reg.add_member(id, 501);

        let mut out = Vec::new();
        handle_child_status(&mut reg, &mut term, &mut out, 777, raw_exited(0));
        assert_eq!(reg.get(id).unwrap().alive, 1);
    }

    #[test]
    fn keyboard_suspend_stops_job_and_announces_leader() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("sleep 100", false));
        reg.add_member(id, 501);
        reg.get_mut(id).unwrap().pgid = 501;

        let mut out = Vec::new();
        handle_child_status(&mut reg, &mut term, &mut out, 501, raw_stopped(libc::SIGTSTP));
        let job = reg.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Stopped);
        assert_eq!(job.alive, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "[1]\tStopped\t\t(sleep 100)\n"
        );
    }

    #[test]
    fn keyboard_suspend_of_non_leader_is_silent() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("a | b", false));
        reg.add_member(id, 501);
        reg.add_member(id, 502);
        reg.get_mut(id).unwrap().pgid = 501;

        let mut out = Vec::new();
        handle_child_status(&mut reg, &mut term, &mut out, 502, raw_stopped(libc::SIGTSTP));
        assert_eq!(reg.get(id).unwrap().status, JobStatus::Stopped);
        assert!(out.is_empty());
    }

    #[test]
    fn programmatic_stop_is_recorded_without_announcement() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("sleep 100", true));
        reg.add_member(id, 501);
        reg.get_mut(id).unwrap().pgid = 501;

        let mut out = Vec::new();
        handle_child_status(&mut reg, &mut term, &mut out, 501, raw_stopped(libc::SIGSTOP));
        assert_eq!(reg.get(id).unwrap().status, JobStatus::Stopped);
        assert!(out.is_empty());
    }

    #[test]
    fn terminal_access_request_promotes_to_foreground() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("cat", true));
        reg.add_member(id, 501);
        reg.get_mut(id).unwrap().pgid = 501;

        let mut out = Vec::new();
        for signal in [libc::SIGTTIN, libc::SIGTTOU] {
            reg.get_mut(id).unwrap().status = JobStatus::Background;
            handle_child_status(&mut reg, &mut term, &mut out, 501, raw_stopped(signal));
            // Detached TermState transfers trivially, so the promotion lands.
            assert_eq!(reg.get(id).unwrap().status, JobStatus::Foreground);
        }
    }

    #[test]
    fn interrupt_termination_prints_bare_newline() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("sleep 100", false));
        reg.add_member(id, 501);

        let mut out = Vec::new();
        handle_child_status(&mut reg, &mut term, &mut out, 501, raw_signaled(libc::SIGINT));
        assert_eq!(String::from_utf8(out).unwrap(), "\n");
        assert_eq!(reg.get(id).unwrap().alive, 0);
    }

    #[test]
    fn each_terminating_signal_reports_its_own_description() {
        let _guard = SigchldBlocked::new().unwrap();
        let mut reg = JobRegistry::new();
        let mut term = TermState::detached();
        let id = reg.create(pipeline("sleep 100", false));
        reg.add_member(id, 501);
        reg.add_member(id, 502);

        let mut out = Vec::new();
        handle_child_status(&mut reg, &mut term, &mut out, 501, raw_signaled(libc::SIGTERM));
        handle_child_status(&mut reg, &mut term, &mut out, 502, raw_signaled(libc::SIGKILL));
        assert_eq!(String::from_utf8(out).unwrap(), "Terminated\nKilled\n");
        assert_eq!(reg.get(id).unwrap().alive, 0);
    }
}
