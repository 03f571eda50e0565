//! Structured outcomes of termination attempts.

use serde::{Deserialize, Serialize};

/// Which escalation step a termination outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillStep {
    /// SIGTERM phase.
    Graceful,
    /// SIGKILL phase.
    Forceful,
}

impl std::fmt::Display for KillStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillStep::Graceful => write!(f, "graceful"),
            KillStep::Forceful => write!(f, "forceful"),
        }
    }
}

/// Result of one two-phase termination attempt. Produced once, immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillOutcome {
    /// Process the attempt targeted.
    pub pid: u32,
    /// Whether the process is gone.
    pub succeeded: bool,
    /// The step at which the attempt concluded.
    pub step: KillStep,
    /// Human-readable reason when `succeeded` is false.
    pub error: Option<String>,
}

impl KillOutcome {
    pub fn success(pid: u32, step: KillStep) -> Self {
        Self {
            pid,
            succeeded: true,
            step,
            error: None,
        }
    }

    pub fn failure(pid: u32, step: KillStep, error: impl Into<String>) -> Self {
        Self {
            pid,
            succeeded: false,
            step,
            error: Some(error.into()),
        }
    }
}

impl std::fmt::Display for KillOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.succeeded {
            write!(f, "PID {} terminated ({})", self.pid, self.step)
        } else {
            write!(
                f,
                "PID {} not terminated ({}): {}",
                self.pid,
                self.step,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// Aggregate result of a sequential kill-all run over a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkKillOutcome {
    /// Number of processes confirmed gone.
    pub succeeded: usize,
    /// Number of processes that survived or could not be signaled.
    pub failed: usize,
    /// One `"<pid> (<step>)"` entry per failure.
    pub failures: Vec<String>,
}

impl BulkKillOutcome {
    /// Fold one termination outcome into the aggregate.
    pub fn record(&mut self, outcome: &KillOutcome) {
        if outcome.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            self.failures.push(format!("{} ({})", outcome.pid, outcome.step));
        }
    }
}
