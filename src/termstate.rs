//! Terminal ownership.
//!
//! The controlling terminal is owned by exactly one process group at a time.
//! The shell transfers ownership to a job's group when the job runs in the
//! foreground and takes it back the moment the job stops or exits. When stdin
//! is not a terminal every operation here is a no-op, which keeps the shell
//! usable with piped input.

use std::io;

/// Tracks the shell's side of terminal ownership: the tty fd (if any), the
/// shell's own process group, and the last known-good terminal attributes.
pub struct TermState {
    tty_fd: Option<libc::c_int>,
    shell_pgid: libc::pid_t,
    /// Attributes restored whenever the shell takes the terminal back.
    /// Re-sampled after a foreground job exits cleanly, on the theory that a
    /// clean exit left the terminal in a state the user wants kept.
    good_state: Option<libc::termios>,
}

impl TermState {
    pub fn new() -> io::Result<Self> {
        let tty_fd = if unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
            Some(libc::STDIN_FILENO)
        } else {
            None
        };

        let shell_pgid = unsafe { libc::getpgrp() };
        let good_state = match tty_fd {
            Some(fd) => Some(read_attributes(fd)?),
            None => None,
        };

        Ok(Self {
            tty_fd,
            shell_pgid,
            good_state,
        })
    }

    /// A `TermState` bound to no terminal, for tests that must not touch the
    /// process's real tty.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self {
            tty_fd: None,
            shell_pgid: unsafe { libc::getpgrp() },
            good_state: None,
        }
    }

    pub fn tty_fd(&self) -> Option<libc::c_int> {
        self.tty_fd
    }

    pub fn shell_pgid(&self) -> libc::pid_t {
        self.shell_pgid
    }

    /// Process group that currently owns the terminal, or `None` without one.
    pub fn current_owner(&self) -> Option<libc::pid_t> {
        let fd = self.tty_fd?;
        let pgid = unsafe { libc::tcgetpgrp(fd) };
        (pgid > 0).then_some(pgid)
    }

    /// Transfer terminal ownership to `pgid`, optionally restoring terminal
    /// attributes previously captured for that job.
    pub fn give_terminal_to(
        &self,
        saved_state: Option<&libc::termios>,
        pgid: libc::pid_t,
    ) -> io::Result<()> {
        let Some(fd) = self.tty_fd else {
            return Ok(());
        };
        set_terminal_foreground(fd, pgid)?;
        if let Some(attributes) = saved_state {
            write_attributes(fd, attributes)?;
        }
        Ok(())
    }

    /// Return ownership to the shell's own group and restore the known-good
    /// attributes. Every path that finishes using the terminal on behalf of
    /// a job calls this.
    pub fn give_terminal_back_to_shell(&self) -> io::Result<()> {
        self.give_terminal_to(self.good_state.as_ref(), self.shell_pgid)
    }

    /// Capture the terminal's current attributes for a job that is about to
    /// relinquish the terminal (e.g. it was just stopped by Ctrl-Z).
    pub fn capture(&self) -> Option<libc::termios> {
        self.tty_fd.and_then(|fd| read_attributes(fd).ok())
    }

    /// Adopt the terminal's current attributes as the known-good state.
    /// Called after a foreground job exits with status zero.
    pub fn sample(&mut self) {
        if let Some(fd) = self.tty_fd {
            if let Ok(attributes) = read_attributes(fd) {
                self.good_state = Some(attributes);
            }
        }
    }
}

fn read_attributes(fd: libc::c_int) -> io::Result<libc::termios> {
    let mut attributes: libc::termios = unsafe { std::mem::zeroed() };
    loop {
        let rc = unsafe { libc::tcgetattr(fd, &mut attributes) };
        if rc == 0 {
            return Ok(attributes);
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

fn write_attributes(fd: libc::c_int, attributes: &libc::termios) -> io::Result<()> {
    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, attributes) };
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

fn set_terminal_foreground(fd: libc::c_int, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    // tcsetpgrp from a non-owning group raises SIGTTOU; ignore it for the
    // duration so taking the terminal back always succeeds.
    let _sigttou = SignalIgnoreGuard::ignore(libc::SIGTTOU)?;
    loop {
        let rc = unsafe { libc::tcsetpgrp(fd, pgid) };
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

struct SignalIgnoreGuard {
    signal: libc::c_int,
    previous: libc::sighandler_t,
}

impl SignalIgnoreGuard {
    fn ignore(signal: libc::c_int) -> io::Result<Self> {
        let previous = unsafe { libc::signal(signal, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { signal, previous })
    }
}

impl Drop for SignalIgnoreGuard {
    fn drop(&mut self) {
        unsafe {
            libc::signal(self.signal, self.previous);
        }
    }
}
