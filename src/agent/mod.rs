pub mod config_file;
pub mod driver;
pub mod quick_tunnel;
pub mod session;

use std::time::Duration;

pub use driver::{AgentHandle, RouteDnsOutcome, RunOutcome};
pub use session::AgentSession;

/// Either flavor of live agent process the Coordinator can end up holding:
/// a named-tunnel run (full handle, channel-backed) or a quick-tunnel
/// process (a bare `Child`, since quick tunnels skip the config/session
/// machinery entirely). Unifies the two so the Health Monitor and rollback
/// paths don't need to match on session mode.
pub enum RunningAgent {
    Named(AgentHandle),
    Quick(tokio::process::Child),
}

impl RunningAgent {
    pub fn pid(&self) -> Option<u32> {
        match self {
            RunningAgent::Named(handle) => Some(handle.pid()),
            RunningAgent::Quick(child) => child.id(),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            RunningAgent::Named(handle) => handle.is_alive(),
            RunningAgent::Quick(child) => match child.id() {
                // SAFETY: signal 0 performs no action beyond an existence check.
                Some(pid) => unsafe { libc::kill(pid as libc::pid_t, 0) == 0 },
                None => false,
            },
        }
    }

    pub async fn terminate(&mut self, grace: Duration) -> anyhow::Result<()> {
        match self {
            RunningAgent::Named(handle) => handle.terminate(grace).await,
            RunningAgent::Quick(child) => {
                if let Some(pid) = child.id() {
                    // SAFETY: pid identifies the child process we spawned.
                    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                }
                let grace_sleep = tokio::time::sleep(grace);
                tokio::pin!(grace_sleep);
                tokio::select! {
                    _ = child.wait() => {}
                    _ = &mut grace_sleep => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
                Ok(())
            }
        }
    }
}
