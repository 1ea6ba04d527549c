//! Agent Driver (spec.md §4.1): spawns `cloudflared` subcommands and
//! interprets their output.
//!
//! Subprocess spawning generalizes this crate's former
//! `worker/builder/podman.rs::run_build_directly` and
//! `worker/builder/clone.rs::clone_repository` from "wait for exit, inspect
//! combined output" (`Command::output()`) to "observe output while the
//! process is still running" (piped stdout/stderr with a streaming
//! `BufReader::lines()` reader), which `create` and `run` both require.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::LifecycleError;

/// Stderr/exit-code phrases that mean "a conflicting record already exists",
/// matched case-insensitively against `routeDns`'s combined stderr.
const CONFLICT_PHRASES: &[&str] = &[
    "record with that host already exists",
    "a, aaaa, or cname record with that host already exists",
    "record already exists",
    "api error code 1003",
];

/// Outcome of `routeDns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDnsOutcome {
    Ok,
    Conflict,
    Other(String),
}

/// Outcome of racing the `run` handshake (spec.md §4.6, "Critical
/// concurrency hazard").
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// A connection-established line was observed on either stream.
    Connected,
    /// The process exited before announcing readiness.
    ExitedBeforeConnect { exit_code: Option<i32> },
    /// Neither happened within budget.
    TimedOut,
}

/// A live `cloudflared tunnel run` subprocess, already past (or never
/// reaching) the handshake. Ownership of the underlying `Child` lives in a
/// dedicated task (`spawn_owner_task`); this handle only holds channels.
pub struct AgentHandle {
    pid: u32,
    terminate_tx: Option<tokio::sync::mpsc::Sender<TerminateRequest>>,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
}

#[derive(Debug)]
enum TerminateRequest {
    Graceful { grace: Duration },
}

impl AgentHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Signal-0 liveness probe (spec.md §4.6: "a liveness probe confirms the
    /// PID exists").
    pub fn is_alive(&self) -> bool {
        if self.exit_rx.borrow().is_some() {
            return false;
        }
        // SAFETY: sending signal 0 performs no action beyond existence and
        // permission checks; `pid` is a valid process id we spawned.
        let result = unsafe { libc::kill(self.pid as libc::pid_t, 0) };
        result == 0
    }

    /// A receiver that resolves once the process exits, for the Health
    /// Monitor to observe post-handoff (spec.md §4.6: "subsequent exits are
    /// handled by the Health Monitor").
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit_rx.clone()
    }

    /// SIGTERM, then SIGKILL after `grace` if the process hasn't exited.
    pub async fn terminate(&self, grace: Duration) -> anyhow::Result<()> {
        if let Some(tx) = &self.terminate_tx {
            let _ = tx.send(TerminateRequest::Graceful { grace }).await;
        }
        let mut exit_rx = self.exit_rx.clone();
        // Best-effort wait for the owner task to reap the process; callers
        // that need a hard deadline add their own timeout around this.
        let _ = exit_rx.changed().await;
        Ok(())
    }
}

/// Drives `cloudflared` subcommands, all sharing the same `--config <path>`
/// (spec.md §9: "model this as a single Agent session... not independent
/// utilities", enforced here: `AgentDriver` never accepts a path per call).
pub struct AgentDriver {
    binary: String,
    config_path: PathBuf,
}

impl AgentDriver {
    pub fn new(binary: impl Into<String>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            config_path: config_path.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--config").arg(&self.config_path);
        cmd
    }

    /// `create(name) -> tunnelId`. Spawns `tunnel create <name>`, scrapes
    /// stdout for `Created tunnel <name> with id <uuid>`. Timeout 30s.
    pub async fn create(&self, name: &str, timeout: Duration) -> Result<Uuid, LifecycleError> {
        let mut cmd = self.command();
        cmd.args(["tunnel", "create", name]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            LifecycleError::AgentNotAvailable(format!("failed to spawn {}: {e}", self.binary))
        })?;

        let pattern = Regex::new(&format!(
            r"Created tunnel {} with id ([0-9a-fA-F-]{{36}})",
            regex::escape(name)
        ))
        .expect("static pattern compiles");

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line {
                        Ok(None) => stdout_done = true,
                        other => if let Some(captured) = scan_for_uuid(other, &pattern) {
                            let _ = child.start_kill();
                            return captured;
                        }
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line {
                        Ok(None) => stderr_done = true,
                        other => if let Some(captured) = scan_for_uuid(other, &pattern) {
                            let _ = child.start_kill();
                            return captured;
                        }
                    }
                }
                status = child.wait() => {
                    let status = status.map_err(|e| LifecycleError::Other(e.into()))?;
                    return Err(LifecycleError::Other(anyhow::anyhow!(
                        "cloudflared tunnel create exited with {status} before reporting a tunnel id"
                    )));
                }
                _ = &mut deadline => {
                    let _ = child.start_kill();
                    return Err(LifecycleError::AgentTimeout {
                        subcommand: "tunnel create",
                        timeout_secs: timeout.as_secs(),
                    });
                }
            }
        }
    }

    /// `routeDns(tunnelId, hostname) -> ok | conflict | other`.
    pub async fn route_dns(
        &self,
        tunnel_id: Uuid,
        hostname: &str,
    ) -> Result<RouteDnsOutcome, LifecycleError> {
        let mut cmd = self.command();
        cmd.args(["tunnel", "route", "dns", &tunnel_id.to_string(), hostname]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| {
            LifecycleError::AgentNotAvailable(format!("failed to spawn {}: {e}", self.binary))
        })?;

        if output.status.success() {
            return Ok(RouteDnsOutcome::Ok);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_ascii_lowercase();
        if CONFLICT_PHRASES.iter().any(|phrase| stderr.contains(phrase)) {
            return Ok(RouteDnsOutcome::Conflict);
        }

        Ok(RouteDnsOutcome::Other(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }

    /// `run(tunnelId) -> running handle`. Races the connection-established
    /// log line against the 60s timeout and process exit; resolves exactly
    /// once (spec.md §4.6's "Critical concurrency hazard").
    pub async fn run(&self, handshake_timeout: Duration) -> Result<(RunOutcome, AgentHandle), LifecycleError> {
        let mut cmd = self.command();
        cmd.args(["tunnel", "run"]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|e| {
            LifecycleError::AgentNotAvailable(format!("failed to spawn {}: {e}", self.binary))
        })?;
        let pid = child.id().unwrap_or(0);

        let pattern = Regex::new("Registered tunnel connection").expect("static pattern compiles");

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        // Whoever `.take()`s this sender first wins: the monotonic
        // resolution flag spec.md requires, expressed as an `Option` taken
        // exactly once rather than a separate atomic bool.
        let (outcome_tx, outcome_rx) = oneshot::channel::<RunOutcome>();
        let outcome_tx = Arc::new(Mutex::new(Some(outcome_tx)));

        let (exit_tx, exit_rx) = watch::channel::<Option<ExitStatus>>(None);
        let (terminate_tx, mut terminate_rx) = tokio::sync::mpsc::channel::<TerminateRequest>(1);

        spawn_line_scanner(stdout, pattern.clone(), outcome_tx.clone());
        spawn_line_scanner(stderr, pattern, outcome_tx.clone());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    status = child.wait() => {
                        let status = status.ok();
                        let _ = exit_tx.send(status);
                        if let Some(tx) = outcome_tx.lock().unwrap().take() {
                            let _ = tx.send(RunOutcome::ExitedBeforeConnect {
                                exit_code: status.and_then(|s| s.code()),
                            });
                        }
                        break;
                    }
                    Some(TerminateRequest::Graceful { grace }) = terminate_rx.recv() => {
                        // SAFETY: pid identifies the child we spawned above.
                        unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                        let grace_sleep = tokio::time::sleep(grace);
                        tokio::pin!(grace_sleep);
                        tokio::select! {
                            status = child.wait() => {
                                let _ = exit_tx.send(status.ok());
                                break;
                            }
                            _ = &mut grace_sleep => {
                                let _ = child.start_kill();
                                let status = child.wait().await.ok();
                                let _ = exit_tx.send(status);
                                break;
                            }
                        }
                    }
                }
            }
        });

        let deadline = Instant::now() + handshake_timeout;
        let outcome = tokio::select! {
            received = outcome_rx => received.unwrap_or(RunOutcome::TimedOut),
            _ = tokio::time::sleep_until(deadline) => RunOutcome::TimedOut,
        };

        let handle = AgentHandle {
            pid,
            terminate_tx: Some(terminate_tx),
            exit_rx,
        };

        Ok((outcome, handle))
    }

    /// `delete(tunnelId) -> ok | error`. Best-effort; used by rollback and
    /// user-initiated shutdown.
    pub async fn delete(&self, tunnel_id: Uuid) -> anyhow::Result<()> {
        let mut cmd = self.command();
        cmd.args(["tunnel", "delete", &tunnel_id.to_string()]);
        let output = cmd.output().await?;
        if !output.status.success() {
            anyhow::bail!(
                "cloudflared tunnel delete failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

fn spawn_line_scanner<R>(
    stream: R,
    pattern: Regex,
    outcome_tx: Arc<Mutex<Option<oneshot::Sender<RunOutcome>>>>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if pattern.is_match(&line) {
                if let Some(tx) = outcome_tx.lock().unwrap().take() {
                    let _ = tx.send(RunOutcome::Connected);
                }
                break;
            }
        }
    });
}

fn scan_for_uuid(
    line: std::io::Result<Option<String>>,
    pattern: &Regex,
) -> Option<Result<Uuid, LifecycleError>> {
    let line = match line {
        Ok(Some(line)) => line,
        Ok(None) => return None,
        Err(e) => return Some(Err(LifecycleError::Other(e.into()))),
    };
    let captures = pattern.captures(&line)?;
    let raw = captures.get(1)?.as_str();
    Some(
        Uuid::parse_str(raw)
            .map_err(|e| LifecycleError::Other(anyhow::anyhow!("malformed tunnel id {raw}: {e}"))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_phrases_match_case_insensitively() {
        let stderr = "API Error Code 1003: Record already exists";
        let lower = stderr.to_ascii_lowercase();
        assert!(CONFLICT_PHRASES.iter().any(|p| lower.contains(p)));
    }

    #[test]
    fn non_conflict_stderr_does_not_match() {
        let stderr = "permission denied";
        let lower = stderr.to_ascii_lowercase();
        assert!(!CONFLICT_PHRASES.iter().any(|p| lower.contains(p)));
    }

    #[test]
    fn create_pattern_extracts_uuid() {
        let pattern = Regex::new(&format!(
            r"Created tunnel {} with id ([0-9a-fA-F-]{{36}})",
            regex::escape("my-tunnel")
        ))
        .unwrap();
        let line = "2024-01-01T00:00:00Z INF Created tunnel my-tunnel with id 6ba7b810-9dad-11d1-80b4-00c04fd430c8";
        let captures = pattern.captures(line).unwrap();
        assert_eq!(
            captures.get(1).unwrap().as_str(),
            "6ba7b810-9dad-11d1-80b4-00c04fd430c8"
        );
    }

    #[test]
    fn handshake_pattern_matches_regardless_of_stream() {
        let pattern = Regex::new("Registered tunnel connection").unwrap();
        assert!(pattern.is_match("INF Registered tunnel connection connIndex=0"));
    }

    fn _assert_path_field(driver: &AgentDriver) -> &Path {
        &driver.config_path
    }
}
