//! SIGCHLD notification machinery.
//!
//! The kernel's child-status notices are asynchronous; the job table is not.
//! The shell therefore keeps the handler trivial (it only raises a flag) and
//! does all reaping synchronously, with SIGCHLD blocked, either in the
//! foreground wait loop or in the pre-prompt drain. Blocking is scoped with
//! an RAII guard so no path can forget to resume delivery.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the SIGCHLD handler; cleared when the shell drains pending
/// status changes.
static CHILD_NOTICE: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigchld(_signal: libc::c_int) {
    // Async-signal-safe: a single atomic store, nothing else.
    CHILD_NOTICE.store(true, Ordering::Relaxed);
}

/// Install the SIGCHLD handler. `SA_RESTART` keeps the blocking line read
/// from being interrupted by child exits.
pub fn install_sigchld_handler() -> io::Result<()> {
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = on_sigchld as extern "C" fn(libc::c_int) as libc::sighandler_t;
    action.sa_flags = libc::SA_RESTART;
    unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGCHLD, &action, std::ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// True if a SIGCHLD arrived since the last call; clears the notice.
pub fn take_child_notice() -> bool {
    CHILD_NOTICE.swap(false, Ordering::Relaxed)
}

/// The shell must survive the terminal's job-control keys itself: Ctrl-Z and
/// Ctrl-\ are meant for whichever job owns the terminal, never for the shell.
pub fn ignore_job_control_signals() {
    unsafe {
        libc::signal(libc::SIGTSTP, libc::SIG_IGN);
        libc::signal(libc::SIGQUIT, libc::SIG_IGN);
    }
}

/// Deliver `signal` to every process in the group `pgid`.
pub fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

/// RAII guard that blocks SIGCHLD delivery for its lifetime and restores the
/// previous signal mask on drop.
///
/// Held across any sequence that must observe a consistent job table: job
/// creation through spawning, and the whole of a foreground wait.
pub struct SigchldBlocked {
    prior_mask: libc::sigset_t,
}

impl SigchldBlocked {
    pub fn new() -> io::Result<Self> {
        unsafe {
            let mut block: libc::sigset_t = std::mem::zeroed();
            let mut prior_mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut block);
            libc::sigaddset(&mut block, libc::SIGCHLD);
            if libc::sigprocmask(libc::SIG_BLOCK, &block, &mut prior_mask) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self { prior_mask })
        }
    }
}

impl Drop for SigchldBlocked {
    fn drop(&mut self) {
        unsafe {
            libc::sigprocmask(libc::SIG_SETMASK, &self.prior_mask, std::ptr::null_mut());
        }
    }
}

/// Whether SIGCHLD is currently blocked. Used in debug assertions that the
/// reaper and wait loop only run under the guard.
pub fn sigchld_is_blocked() -> bool {
    unsafe {
        let mut current: libc::sigset_t = std::mem::zeroed();
        if libc::sigprocmask(libc::SIG_SETMASK, std::ptr::null(), &mut current) != 0 {
            return false;
        }
        libc::sigismember(&current, libc::SIGCHLD) == 1
    }
}
