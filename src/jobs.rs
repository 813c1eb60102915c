use std::io::Write;

use crate::ast::Pipeline;

/// Hard capacity limit on concurrently live jobs. Running out of job ids is
/// treated as unrecoverable, matching the shell's fatal-error policy.
pub const MAX_JOBS: usize = 1 << 16;

/// The lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Running with exclusive terminal ownership. At most one job at a time.
    Foreground,
    /// Running without the terminal.
    Background,
    /// Stopped by a signal or by the `stop` builtin.
    Stopped,
    /// Stopped because it touched the terminal from the background.
    NeedsTerminal,
}

impl JobStatus {
    /// Status word shown in `jobs` output.
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Foreground => "Foreground",
            JobStatus::Background => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::NeedsTerminal => "Stopped (tty)",
        }
    }
}

/// One pipeline currently known to the shell.
pub struct Job {
    pub id: usize,
    /// Process group shared by every member; 0 until the first spawn succeeds.
    pub pgid: libc::pid_t,
    /// Member pids in pipeline-stage order.
    pub members: Vec<libc::pid_t>,
    pub pipeline: Pipeline,
    pub status: JobStatus,
    /// Members not yet known to have exited. Mutated only by the reaper.
    pub alive: usize,
    /// Terminal attributes captured when this job last relinquished the
    /// terminal while stopped; restored if the job is resumed with `fg`.
    pub saved_tty_state: Option<libc::termios>,
}

impl Job {
    /// Job line as printed by `jobs` and by the reaper on Ctrl-Z.
    pub fn describe(&self) -> String {
        format!(
            "[{}]\t{}\t\t({})",
            self.id,
            self.status.label(),
            self.pipeline.command_line()
        )
    }
}

/// The shell's job registry: owns every live job and assigns job ids.
///
/// Ids index directly into the slot table, so lookup by id is O(1); the
/// lowest free slot is always reused first, so ids stay small. Lookup by
/// member pid scans, which is fine at interactive job counts.
pub struct JobRegistry {
    // slots[0] is never used; job ids start at 1.
    slots: Vec<Option<Job>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self { slots: vec![None] }
    }

    /// Allocate a job for `pipeline` with the lowest unused id.
    ///
    /// The job starts Background or Foreground per the pipeline's intent and
    /// has no members yet; the launcher registers members as they spawn.
    /// Aborts the shell if the id space is exhausted.
    pub fn create(&mut self, pipeline: Pipeline) -> usize {
        let status = if pipeline.background {
            JobStatus::Background
        } else {
            JobStatus::Foreground
        };

        let id = match self.slots.iter().skip(1).position(|slot| slot.is_none()) {
            Some(i) => i + 1,
            None if self.slots.len() < MAX_JOBS => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => {
                eprintln!("conch: maximum number of jobs exceeded");
                std::process::abort();
            }
        };

        self.slots[id] = Some(Job {
            id,
            pgid: 0,
            members: Vec::new(),
            pipeline,
            status,
            alive: 0,
            saved_tty_state: None,
        });
        id
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.slots.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.slots.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Find the job owning `pid`, if any.
    pub fn job_of_pid(&self, pid: libc::pid_t) -> Option<usize> {
        self.live_jobs()
            .find(|job| job.members.contains(&pid))
            .map(|job| job.id)
    }

    /// Record a successfully spawned member process.
    pub fn add_member(&mut self, id: usize, pid: libc::pid_t) {
        let job = self
            .get_mut(id)
            .expect("add_member called for a reclaimed job");
        job.members.push(pid);
        job.alive += 1;
    }

    /// Remove and destroy every job whose processes have all terminated,
    /// announcing `[id]\tDone` for background jobs.
    ///
    /// Callers must not hold an in-progress wait on any of these jobs; the
    /// wait loop calls this only after its job has left the foreground.
    pub fn reclaim_finished(&mut self, out: &mut dyn Write) {
        for slot in self.slots.iter_mut().skip(1) {
            let finished = slot.as_ref().is_some_and(|job| job.alive == 0);
            if finished {
                let job = slot.take().unwrap();
                if job.pipeline.background {
                    let _ = writeln!(out, "[{}]\tDone", job.id);
                }
            }
        }
    }

    /// Live jobs in ascending id order.
    pub fn live_jobs(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(cmd: &str, background: bool) -> Pipeline {
        Pipeline {
            stages: vec![crate::ast::Stage {
                argv: cmd.split(' ').map(String::from).collect(),
                dup_stderr_to_stdout: false,
            }],
            input_file: None,
            output_file: None,
            append_output: false,
            background,
        }
    }

    #[test]
    fn ids_are_assigned_lowest_first() {
        let mut reg = JobRegistry::new();
        assert_eq!(reg.create(pipeline("a", false)), 1);
        assert_eq!(reg.create(pipeline("b", false)), 2);
        assert_eq!(reg.create(pipeline("c", false)), 3);
    }

    #[test]
    fn reclaimed_id_is_reused_without_aliasing() {
        let mut reg = JobRegistry::new();
        let a = reg.create(pipeline("a", false));
        let b = reg.create(pipeline("b", false));
        reg.add_member(b, 100);

        // Job a has no live members; a sweep reclaims it and frees its id.
        reg.reclaim_finished(&mut Vec::<u8>::new());
        assert!(reg.get(a).is_none());
        assert!(reg.get(b).is_some());

        let c = reg.create(pipeline("c", false));
        assert_eq!(c, a, "lowest freed id should be reused");
        assert_eq!(reg.get(c).unwrap().pipeline.command_line(), "c");
        assert_eq!(reg.get(b).unwrap().pipeline.command_line(), "b");
    }

    #[test]
    fn initial_status_follows_background_intent() {
        let mut reg = JobRegistry::new();
        let fg = reg.create(pipeline("a", false));
        let bg = reg.create(pipeline("b", true));
        assert_eq!(reg.get(fg).unwrap().status, JobStatus::Foreground);
        assert_eq!(reg.get(bg).unwrap().status, JobStatus::Background);
    }

    #[test]
    fn lookup_by_member_pid() {
        let mut reg = JobRegistry::new();
        let a = reg.create(pipeline("a", false));
        let b = reg.create(pipeline("b", false));
        reg.add_member(a, 10);
        reg.add_member(a, 11);
        reg.add_member(b, 20);

        assert_eq!(reg.job_of_pid(11), Some(a));
        assert_eq!(reg.job_of_pid(20), Some(b));
        assert_eq!(reg.job_of_pid(999), None);
    }

    #[test]
    fn lookup_of_unknown_or_reclaimed_id_is_absent() {
        let mut reg = JobRegistry::new();
        assert!(reg.get(1).is_none());
        assert!(reg.get(4096).is_none());

        let a = reg.create(pipeline("a", false));
        reg.reclaim_finished(&mut Vec::<u8>::new());
        assert!(reg.get(a).is_none());
    }

    #[test]
    fn reclaim_is_a_noop_when_all_jobs_alive() {
        let mut reg = JobRegistry::new();
        let a = reg.create(pipeline("a", true));
        reg.add_member(a, 10);

        let mut out = Vec::new();
        reg.reclaim_finished(&mut out);
        reg.reclaim_finished(&mut out);
        assert!(reg.get(a).is_some());
        assert!(out.is_empty());
    }

    #[test]
    fn background_job_announces_done_exactly_once() {
        let mut reg = JobRegistry::new();
        let a = reg.create(pipeline("sleep 100", true));
        reg.add_member(a, 10);
        reg.get_mut(a).unwrap().alive = 0;

        let mut out = Vec::new();
        reg.reclaim_finished(&mut out);
        reg.reclaim_finished(&mut out);
        assert_eq!(String::from_utf8(out).unwrap(), "[1]\tDone\n");
    }

    #[test]
    fn foreground_job_is_reclaimed_silently() {
        let mut reg = JobRegistry::new();
        let a = reg.create(pipeline("ls", false));
        reg.add_member(a, 10);
        reg.get_mut(a).unwrap().alive = 0;

        let mut out = Vec::new();
        reg.reclaim_finished(&mut out);
        assert!(reg.get(a).is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn describe_matches_jobs_output_format() {
        let mut reg = JobRegistry::new();
        let a = reg.create(pipeline("sleep 100", true));
        assert_eq!(reg.get(a).unwrap().describe(), "[1]\tRunning\t\t(sleep 100)");
    }
}
