//! Two-phase process termination: SIGTERM, bounded wait, SIGKILL, verify.
//!
//! Many dev-server runtimes ignore or slow-handle SIGTERM, so the controller
//! always escalates after a short grace period instead of waiting
//! indefinitely. The waits are fixed and small to keep callers responsive.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::models::{BulkKillOutcome, KillOutcome, KillStep, ListeningProcess};

/// Grace period after SIGTERM before escalating.
const GRACEFUL_WAIT: Duration = Duration::from_millis(500);

/// Wait after SIGKILL before declaring the process unkillable.
const FORCEFUL_WAIT: Duration = Duration::from_millis(300);

/// States of the termination state machine. Transitions run in declaration
/// order; every state can also conclude with a terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KillPhase {
    SendGraceful,
    WaitGraceful,
    SendForceful,
    WaitForceful,
}

/// Termination controller for single and bulk kills.
#[derive(Debug, Default)]
pub struct ProcessKiller;

impl ProcessKiller {
    pub fn new() -> Self {
        Self
    }

    /// Non-destructive liveness probe via `kill(pid, 0)`.
    ///
    /// EPERM means the process exists but belongs to someone else; that
    /// counts as alive.
    pub fn is_alive(&self, pid: u32) -> bool {
        match kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn send_signal(&self, pid: u32, signal: Signal) -> Result<(), Errno> {
        debug!(pid, signal = ?signal, "sending signal");
        kill(Pid::from_raw(pid as i32), signal)
    }

    /// Run the two-phase termination state machine for one pid.
    ///
    /// A pid that is already gone (ESRCH on send) is success: absence is the
    /// goal, and kills routinely race against processes exiting on their own.
    pub async fn terminate(&self, pid: u32) -> KillOutcome {
        let mut phase = KillPhase::SendGraceful;
        loop {
            phase = match phase {
                KillPhase::SendGraceful => match self.send_signal(pid, Signal::SIGTERM) {
                    Ok(()) => KillPhase::WaitGraceful,
                    Err(Errno::ESRCH) => {
                        debug!(pid, "process already gone before SIGTERM");
                        return KillOutcome::success(pid, KillStep::Graceful);
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "failed to send SIGTERM");
                        return KillOutcome::failure(pid, KillStep::Graceful, e.desc());
                    }
                },
                KillPhase::WaitGraceful => {
                    sleep(GRACEFUL_WAIT).await;
                    if !self.is_alive(pid) {
                        debug!(pid, "terminated after SIGTERM");
                        return KillOutcome::success(pid, KillStep::Graceful);
                    }
                    KillPhase::SendForceful
                }
                KillPhase::SendForceful => match self.send_signal(pid, Signal::SIGKILL) {
                    Ok(()) => KillPhase::WaitForceful,
                    Err(Errno::ESRCH) => {
                        debug!(pid, "process gone before SIGKILL");
                        return KillOutcome::success(pid, KillStep::Forceful);
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "failed to send SIGKILL");
                        return KillOutcome::failure(pid, KillStep::Forceful, e.desc());
                    }
                },
                KillPhase::WaitForceful => {
                    sleep(FORCEFUL_WAIT).await;
                    if !self.is_alive(pid) {
                        debug!(pid, "terminated after SIGKILL");
                        return KillOutcome::success(pid, KillStep::Forceful);
                    }
                    warn!(pid, "process still alive after SIGKILL");
                    return KillOutcome::failure(
                        pid,
                        KillStep::Forceful,
                        "process still alive after SIGKILL",
                    );
                }
            };
        }
    }

    /// Terminate every process in the snapshot, sequentially.
    ///
    /// Sequential on purpose: signaling many processes concurrently buys
    /// nothing and muddies failure attribution. The snapshot is not re-read
    /// mid-operation; a process that exited since the snapshot counts as
    /// success.
    pub async fn terminate_all(&self, snapshot: &[ListeningProcess]) -> BulkKillOutcome {
        let mut outcome = BulkKillOutcome::default();
        for process in snapshot {
            let result = self.terminate(process.pid).await;
            outcome.record(&result);
        }
        outcome
    }
}
