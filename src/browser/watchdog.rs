//! Per-process accounting for a browser instance.
//!
//! Headless browsers routinely fail to exit through their own control
//! channel; the watchdog tracks every OS process the launch produced and,
//! when graceful close fails, walks the set with a terminate → grace-wait →
//! kill escalation. Each pid is handled independently and ends up in the
//! teardown report, alive or not.

use std::time::{Duration, Instant};
use sysinfo::{Pid, Process, ProcessStatus, Signal, System};
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// What happened to one tracked pid during forced termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidOutcome {
    /// Not running when the fallback pass reached it.
    AlreadyExited,
    /// Exited within the grace period after a terminate signal.
    Terminated,
    /// Ignored terminate and was killed.
    Killed,
    /// Survived both signals; operator attention needed.
    StillAlive,
}

/// Per-pid outcome record of one teardown pass.
#[derive(Debug, Default)]
pub struct TeardownReport {
    outcomes: Vec<(u32, PidOutcome)>,
}

impl TeardownReport {
    pub fn record(&mut self, pid: u32, outcome: PidOutcome) {
        self.outcomes.push((pid, outcome));
    }

    pub fn outcomes(&self) -> &[(u32, PidOutcome)] {
        &self.outcomes
    }

    pub fn still_alive(&self) -> Vec<u32> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == PidOutcome::StillAlive)
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.still_alive().is_empty()
    }
}

/// Tracks the process ids spawned by one browser session.
#[derive(Debug, Default)]
pub struct ProcessWatchdog {
    pids: Vec<u32>,
}

fn is_running(proc: &Process) -> bool {
    // A zombie has already exited; it only awaits reaping.
    !matches!(proc.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

fn alive(sys: &System, pid: u32) -> bool {
    sys.process(Pid::from_u32(pid)).is_some_and(is_running)
}

impl ProcessWatchdog {
    /// Record the root pid plus every descendant visible at launch time.
    pub fn track(root: u32) -> Self {
        let mut sys = System::new();
        sys.refresh_processes();

        let mut pids = vec![root];
        let mut frontier = vec![Pid::from_u32(root)];
        while let Some(parent) = frontier.pop() {
            for (pid, proc) in sys.processes() {
                if proc.parent() == Some(parent) {
                    pids.push(pid.as_u32());
                    frontier.push(*pid);
                }
            }
        }

        info!("browser launched with pids: {:?}", pids);
        Self { pids }
    }

    pub(crate) fn from_pids(pids: Vec<u32>) -> Self {
        Self { pids }
    }

    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    /// Terminate → grace-wait → kill, independently per tracked pid.
    ///
    /// Blocking (polls liveness); call from a blocking context.
    pub fn force_terminate(&self, grace: Duration) -> TeardownReport {
        let mut sys = System::new();
        let mut report = TeardownReport::default();

        for &pid in &self.pids {
            sys.refresh_processes();
            if !alive(&sys, pid) {
                info!("browser process {} already terminated", pid);
                report.record(pid, PidOutcome::AlreadyExited);
                continue;
            }

            if let Some(proc) = sys.process(Pid::from_u32(pid)) {
                if proc.kill_with(Signal::Term).is_none() {
                    // Platform without a terminate signal: go straight to kill.
                    proc.kill();
                }
            }

            if Self::wait_for_exit(&mut sys, pid, grace) {
                info!("browser process {} terminated", pid);
                report.record(pid, PidOutcome::Terminated);
                continue;
            }

            warn!("process {} ignored terminate, killing", pid);
            sys.refresh_processes();
            if let Some(proc) = sys.process(Pid::from_u32(pid)) {
                proc.kill();
            }

            if Self::wait_for_exit(&mut sys, pid, grace) {
                info!("browser process {} killed", pid);
                report.record(pid, PidOutcome::Killed);
            } else {
                error!("failed to close browser process {} by all means", pid);
                report.record(pid, PidOutcome::StillAlive);
            }
        }

        report
    }

    fn wait_for_exit(sys: &mut System, pid: u32, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            sys.refresh_processes();
            if !alive(sys, pid) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Outcome snapshot without signalling, used after a graceful close.
    pub fn liveness_report(&self) -> TeardownReport {
        let mut sys = System::new();
        sys.refresh_processes();

        let mut report = TeardownReport::default();
        for &pid in &self.pids {
            let outcome = if alive(&sys, pid) {
                PidOutcome::StillAlive
            } else {
                PidOutcome::AlreadyExited
            };
            report.record(pid, outcome);
        }
        report
    }

    /// Final liveness check over the tracked set. Survivors are logged, not
    /// raised: this is a diagnostic for operators.
    pub fn verify(&self) -> Vec<u32> {
        let mut sys = System::new();
        sys.refresh_processes();

        let mut survivors = Vec::new();
        for &pid in &self.pids {
            if alive(&sys, pid) {
                error!("final check - browser process {} is still running", pid);
                survivors.push(pid);
            } else {
                info!("final check - browser process {} is closed", pid);
            }
        }
        survivors
    }

    /// Forget every tracked pid. Runs unconditionally at the end of
    /// teardown so a later session never inherits stale ids.
    pub fn clear(&mut self) {
        self.pids.clear();
    }

    /// Kill every process whose name contains `fragment` (case-insensitive).
    /// Nightly janitor for browsers that escaped their session.
    pub fn sweep(fragment: &str) -> usize {
        let mut sys = System::new();
        sys.refresh_processes();

        let needle = fragment.to_lowercase();
        let mut killed = 0usize;
        for (pid, proc) in sys.processes() {
            if proc.name().to_lowercase().contains(&needle) && is_running(proc) {
                if proc.kill() {
                    killed += 1;
                    info!("killed stray browser process {}", pid.as_u32());
                } else {
                    warn!("failed to kill stray browser process {}", pid.as_u32());
                }
            }
        }

        if killed == 0 {
            info!("no stray browser processes found");
        } else {
            info!("total stray browser processes killed: {}", killed);
        }
        killed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn force_terminate_accounts_for_every_pid() {
        let mut tame = Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let mut stubborn = Command::new("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .expect("spawn trap shell");

        // Give the shell a moment to install its trap.
        std::thread::sleep(Duration::from_millis(300));

        let mut watchdog = ProcessWatchdog::from_pids(vec![tame.id(), stubborn.id()]);
        let report = watchdog.force_terminate(Duration::from_secs(2));

        assert_eq!(report.outcomes().len(), 2);
        let outcome_of = |pid: u32| {
            report
                .outcomes()
                .iter()
                .find(|(p, _)| *p == pid)
                .map(|(_, o)| *o)
                .expect("pid present in report")
        };
        assert_eq!(outcome_of(tame.id()), PidOutcome::Terminated);
        assert_eq!(outcome_of(stubborn.id()), PidOutcome::Killed);
        assert!(report.is_complete());

        watchdog.clear();
        assert!(watchdog.pids().is_empty());

        let _ = tame.wait();
        let _ = stubborn.wait();
    }

    #[test]
    fn already_exited_pid_is_reported_not_dropped() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        let _ = child.wait();

        let watchdog = ProcessWatchdog::from_pids(vec![pid]);
        let report = watchdog.force_terminate(Duration::from_millis(500));

        assert_eq!(report.outcomes().len(), 1);
        assert_eq!(report.outcomes()[0].1, PidOutcome::AlreadyExited);
        assert!(report.is_complete());
    }
}
