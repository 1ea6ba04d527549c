//! Random-hostname fallback mode (spec.md §1, §4.6, §8-S6).
//!
//! Out of scope beyond its public contract: spawn the agent with `--url`,
//! scrape its stdout/stderr for a `*.trycloudflare.com` URL, skip DNS
//! reconciliation entirely, and still hand off to the Health Monitor. This
//! reuses the same dual-stream line scanner shape as
//! `agent::driver::AgentDriver::run`, parameterized by a different regex
//! and no `--config` flag (quick tunnels are configless).

use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::LifecycleError;

const TRYCLOUDFLARE_PATTERN: &str = r"https://[a-zA-Z0-9-]+\.trycloudflare\.com";

/// Spawns `cloudflared tunnel --url http://localhost:<port>` and returns the
/// scraped public URL once observed on either stream, or once `timeout`
/// elapses.
pub async fn spawn_quick_tunnel(
    binary: &str,
    local_port: u16,
    timeout: Duration,
) -> Result<(String, tokio::process::Child), LifecycleError> {
    let url_arg = format!("http://localhost:{local_port}");
    let mut cmd = Command::new(binary);
    cmd.args(["tunnel", "--url", &url_arg]);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        LifecycleError::AgentNotAvailable(format!("failed to spawn {binary}: {e}"))
    })?;

    let pattern = Regex::new(TRYCLOUDFLARE_PATTERN).expect("static pattern compiles");
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
                    Ok(Some(line)) => if let Some(url) = extract_url(&pattern, &line) {
                        return Ok((url, child));
                    },
                    Err(e) => return Err(LifecycleError::Other(e.into())),
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line {
                    Ok(None) => stderr_done = true,
                    Ok(Some(line)) => if let Some(url) = extract_url(&pattern, &line) {
                        return Ok((url, child));
                    },
                    Err(e) => return Err(LifecycleError::Other(e.into())),
                }
            }
            status = child.wait() => {
                let status = status.map_err(|e| LifecycleError::Other(e.into()))?;
                return Err(LifecycleError::AgentUnexpectedExit { exit_code: status.code() });
            }
            _ = &mut deadline => {
                let _ = child.start_kill();
                return Err(LifecycleError::AgentTimeout {
                    subcommand: "tunnel --url",
                    timeout_secs: timeout.as_secs(),
                });
            }
        }
    }
}

fn extract_url(pattern: &Regex, line: &str) -> Option<String> {
    pattern.find(line).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_trycloudflare_url_from_log_line() {
        let pattern = Regex::new(TRYCLOUDFLARE_PATTERN).unwrap();
        let line = "2024-01-01 INF |  https://chosen-words-held.trycloudflare.com  |";
        assert_eq!(
            extract_url(&pattern, line),
            Some("https://chosen-words-held.trycloudflare.com".to_string())
        );
    }

    #[test]
    fn ignores_lines_without_a_match() {
        let pattern = Regex::new(TRYCLOUDFLARE_PATTERN).unwrap();
        assert_eq!(extract_url(&pattern, "INF Starting tunnel"), None);
    }
}
