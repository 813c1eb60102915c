//! Decoding of raw `waitpid` statuses into an explicit variant type.
//!
//! Job-state logic matches on [`ChildStatus`] rather than testing raw status
//! bits, so every transition names the exact condition it handles.

use std::io;

/// What a status change reported by `waitpid` means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// The process exited on its own with this exit code.
    Exited(i32),
    /// The process was stopped by this signal (observed via `WUNTRACED`).
    Stopped(i32),
    /// The process was terminated by this signal.
    Terminated(i32),
}

impl ChildStatus {
    /// Decode a raw status word from `waitpid`.
    ///
    /// Returns an error for status words that encode none of the three
    /// conditions (e.g. ptrace continue events, which this shell never
    /// requests).
    pub fn decode(raw: libc::c_int) -> io::Result<Self> {
        if unsafe { libc::WIFEXITED(raw) } {
            return Ok(ChildStatus::Exited(unsafe { libc::WEXITSTATUS(raw) }));
        }
        if unsafe { libc::WIFSTOPPED(raw) } {
            return Ok(ChildStatus::Stopped(unsafe { libc::WSTOPSIG(raw) }));
        }
        if unsafe { libc::WIFSIGNALED(raw) } {
            return Ok(ChildStatus::Terminated(unsafe { libc::WTERMSIG(raw) }));
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unrecognized wait status {raw:#x}"),
        ))
    }
}

/// Human-readable description of a terminating signal, in the style of
/// `strsignal(3)`.
pub fn signal_description(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "Hangup",
        libc::SIGINT => "Interrupt",
        libc::SIGQUIT => "Quit",
        libc::SIGILL => "Illegal instruction",
        libc::SIGABRT => "Aborted",
        libc::SIGFPE => "Floating point exception",
        libc::SIGKILL => "Killed",
        libc::SIGSEGV => "Segmentation fault",
        libc::SIGPIPE => "Broken pipe",
        libc::SIGALRM => "Alarm clock",
        libc::SIGTERM => "Terminated",
        libc::SIGUSR1 => "User defined signal 1",
        libc::SIGUSR2 => "User defined signal 2",
        libc::SIGBUS => "Bus error",
        libc::SIGTRAP => "Trace/breakpoint trap",
        libc::SIGXCPU => "CPU time limit exceeded",
        libc::SIGXFSZ => "File size limit exceeded",
        _ => return format!("Signal {signal}"),
    };
    name.to_string()
}
