mod ast;
mod parser;

#[cfg(unix)]
mod builtins;
#[cfg(unix)]
mod executor;
#[cfg(unix)]
mod jobs;
#[cfg(unix)]
mod reaper;
#[cfg(unix)]
mod signals;
#[cfg(unix)]
mod status;
#[cfg(unix)]
mod termstate;

#[cfg(unix)]
use std::io::{self, Write};

#[cfg(unix)]
use crossterm::tty::IsTty;

#[cfg(unix)]
use crate::jobs::JobRegistry;
#[cfg(unix)]
use crate::signals::SigchldBlocked;
#[cfg(unix)]
use crate::termstate::TermState;

#[cfg(unix)]
fn usage(progname: &str) {
    println!("Usage: {progname} -h\n -h            print this help");
}

#[cfg(unix)]
fn main() {
    let mut args = std::env::args();
    let progname = args.next().unwrap_or_else(|| "conch".to_string());
    if let Some(arg) = args.next() {
        if arg == "-h" {
            usage(&progname);
            return;
        }
        eprintln!("conch: unknown option: {arg}");
        usage(&progname);
        std::process::exit(2);
    }

    signals::ignore_job_control_signals();
    if let Err(err) = signals::install_sigchld_handler() {
        eprintln!("conch: failed to install SIGCHLD handler: {err}");
        std::process::exit(1);
    }

    // Ctrl-C at the prompt aborts the current line with a fresh one; while a
    // foreground job holds the terminal, SIGINT goes to the job instead.
    ctrlc::set_handler(|| {
        println!();
        let _ = io::stdout().flush();
    })
    .expect("Failed to set Ctrl-C handler");

    let mut term = match TermState::new() {
        Ok(term) => term,
        Err(err) => {
            eprintln!("conch: failed to read terminal state: {err}");
            std::process::exit(1);
        }
    };
    let mut registry = JobRegistry::new();

    let interactive = io::stdin().is_tty();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        // Line reads must happen with delivery enabled, or background exits
        // would sit unnoticed until the next command.
        debug_assert!(!signals::sigchld_is_blocked());

        // Reconcile anything that happened while the shell was busy or idle:
        // drain pending status reports, then sweep finished jobs.
        if signals::take_child_notice() {
            match SigchldBlocked::new() {
                Ok(_guard) => {
                    reaper::drain_pending(&mut registry, &mut term, &mut stdout);
                    registry.reclaim_finished(&mut stdout);
                }
                Err(err) => eprintln!("conch: failed to block SIGCHLD: {err}"),
            }
        }

        // Every path that lends the terminal out must have returned it by now.
        debug_assert!(
            term.current_owner()
                .is_none_or(|owner| owner == term.shell_pgid())
        );

        if interactive {
            print!("conch> ");
            if stdout.flush().is_err() {
                break;
            }
        }

        let mut input = String::new();
        match stdin.read_line(&mut input) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match parser::parse_line(trimmed) {
                    Ok(line) => {
                        executor::run_command_line(&mut registry, &mut term, &mut stdout, line);
                    }
                    Err(message) => eprintln!("{message}"),
                }
            }
            Err(err) => {
                eprintln!("conch: error reading input: {err}");
                break;
            }
        }
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("conch: job control requires a Unix system");
    std::process::exit(1);
}
