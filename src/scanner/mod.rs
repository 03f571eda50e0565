//! Listener discovery via lsof, with a field-mode primary encoding and a
//! tabular fallback.

mod parse;

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::models::DiscoveredListener;

pub use parse::{parse_field_output, parse_table_output};

/// Wall-clock budget for a field-mode lsof invocation.
const SCAN_TIMEOUT: Duration = Duration::from_secs(4);

/// Wall-clock budget for the tabular fallback invocation.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Cap on accepted lsof output; anything larger is treated as a failed scan.
const MAX_SCAN_OUTPUT: usize = 10 * 1024 * 1024;

/// Budget for a single command-line fetch.
const COMMAND_LINE_TIMEOUT: Duration = Duration::from_secs(2);

/// Source of raw listener records and process command lines.
///
/// The engine is generic over this trait so discovery can be faked in tests;
/// [`LsofScanner`] is the real implementation.
pub trait ListenerSource: Send + Sync {
    /// Enumerate processes named `scan_target` that hold listening TCP
    /// sockets, optionally restricted to the invoking user.
    ///
    /// Never fails: scan errors degrade to an empty list.
    fn discover(
        &self,
        scan_target: &str,
        only_current_user: bool,
    ) -> impl std::future::Future<Output = Vec<DiscoveredListener>> + Send;

    /// Fetch the full command line for a pid. `None` when the process is gone
    /// or the query failed; classification tolerates that.
    fn command_line(&self, pid: u32) -> impl std::future::Future<Output = Option<String>> + Send;
}

/// Output encoding requested from lsof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LsofMode {
    /// `-F pcPn` field output (primary).
    Fields,
    /// Human tabular output (fallback).
    Table,
}

/// Strategies tried in order until one produces a result.
const SCAN_STRATEGIES: [LsofMode; 2] = [LsofMode::Fields, LsofMode::Table];

enum LsofResult {
    Output(String),
    /// lsof exited with status 1: no matching processes. Success, not error.
    NoMatches,
    Failed(String),
}

/// Result of a capped child invocation.
enum CappedOutput {
    Complete {
        status: std::process::ExitStatus,
        stdout: Vec<u8>,
    },
    /// stdout exceeded the cap; the child was killed.
    Overflow,
}

/// Spawn `cmd` and collect stdout through a cap-limited reader, so the cap
/// bounds memory while reading rather than being checked after a full
/// buffered collect. On overflow the child is killed and reaped.
async fn run_capped(mut cmd: Command, cap: usize) -> std::io::Result<CappedOutput> {
    let mut child = cmd.spawn()?;
    let mut stdout = Vec::new();
    if let Some(pipe) = child.stdout.take() {
        let mut limited = pipe.take(cap as u64 + 1);
        limited.read_to_end(&mut stdout).await?;
    }
    if stdout.len() > cap {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Ok(CappedOutput::Overflow);
    }
    let status = child.wait().await?;
    Ok(CappedOutput::Complete { status, stdout })
}

/// Listener Inspector backed by the lsof utility.
pub struct LsofScanner;

impl LsofScanner {
    pub fn new() -> Self {
        Self
    }

    /// Run `lsof -nP -iTCP -sTCP:LISTEN -a -c <target>` in the given output
    /// mode, with the bounded timeout and output cap applied.
    async fn run_lsof(
        &self,
        scan_target: &str,
        only_current_user: bool,
        mode: LsofMode,
    ) -> LsofResult {
        let mut cmd = Command::new("lsof");
        cmd.args(["-nP", "-iTCP", "-sTCP:LISTEN", "-a", "-c", scan_target]);
        if mode == LsofMode::Fields {
            cmd.args(["-F", "pcPn"]);
        }
        if only_current_user {
            if let Some(user) = current_username() {
                cmd.arg("-u").arg(user);
            }
        }
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let budget = match mode {
            LsofMode::Fields => SCAN_TIMEOUT,
            LsofMode::Table => FALLBACK_TIMEOUT,
        };
        let (status, stdout) = match timeout(budget, run_capped(cmd, MAX_SCAN_OUTPUT)).await {
            Ok(Ok(CappedOutput::Complete { status, stdout })) => (status, stdout),
            Ok(Ok(CappedOutput::Overflow)) => {
                return LsofResult::Failed(format!("lsof output exceeded {MAX_SCAN_OUTPUT} bytes"))
            }
            Ok(Err(e)) => return LsofResult::Failed(format!("failed to run lsof: {e}")),
            Err(_) => return LsofResult::Failed(format!("lsof timed out after {budget:?}")),
        };

        match status.code() {
            Some(0) => match String::from_utf8(stdout) {
                Ok(stdout) => LsofResult::Output(stdout),
                Err(e) => LsofResult::Failed(format!("invalid UTF-8 in lsof output: {e}")),
            },
            Some(1) => LsofResult::NoMatches,
            code => LsofResult::Failed(format!("lsof exited with status {code:?}")),
        }
    }
}

impl Default for LsofScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerSource for LsofScanner {
    async fn discover(&self, scan_target: &str, only_current_user: bool) -> Vec<DiscoveredListener> {
        for mode in SCAN_STRATEGIES {
            match self.run_lsof(scan_target, only_current_user, mode).await {
                LsofResult::Output(stdout) => {
                    return match mode {
                        LsofMode::Fields => parse_field_output(&stdout),
                        LsofMode::Table => parse_table_output(&stdout, scan_target),
                    };
                }
                LsofResult::NoMatches => return Vec::new(),
                LsofResult::Failed(reason) => {
                    debug!(scan_target, mode = ?mode, reason = %reason, "lsof scan failed");
                }
            }
        }
        Vec::new()
    }

    /// Fetch the command line via `ps -p <pid> -o command=`.
    async fn command_line(&self, pid: u32) -> Option<String> {
        let result = timeout(
            COMMAND_LINE_TIMEOUT,
            Command::new("ps")
                .args(["-p", &pid.to_string(), "-o", "command="])
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(pid, error = %e, "ps invocation failed");
                return None;
            }
            Err(_) => {
                debug!(pid, "ps timed out");
                return None;
            }
        };

        if !output.status.success() {
            // Process exited between discovery and classification.
            return None;
        }

        let stdout = String::from_utf8(output.stdout).ok()?;
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}

/// Name of the invoking user, for the `-u` restriction.
fn current_username() -> Option<String> {
    if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::Uid::effective()) {
        return Some(user.name);
    }
    std::env::var("USER").ok()
}
