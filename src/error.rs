//! Error taxonomy for the lifecycle engine.
//!
//! Internal helpers return `anyhow::Result` with `.context(...)`, the same as
//! the rest of this crate's subprocess and HTTP plumbing. The Coordinator is
//! the single seam that classifies a failure into one of these variants
//! before it crosses the public API boundary.

use thiserror::Error;

/// The kinds of failure a named-tunnel transaction can surface to its caller.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Origin certificate (`cert.pem`) is absent. Named tunnels are
    /// unavailable until the user runs `cloudflared tunnel login`.
    #[error("no origin certificate found; interactive login required")]
    AuthMissingCert,

    /// The DNS API token failed `verifyToken()`.
    #[error("Cloudflare API token is invalid or expired")]
    AuthBadToken,

    /// The `cloudflared` binary could not be located or executed.
    #[error("cloudflared binary is not available: {0}")]
    AgentNotAvailable(String),

    /// A subcommand did not produce its expected signal within budget.
    #[error("cloudflared {subcommand} timed out after {timeout_secs}s")]
    AgentTimeout {
        subcommand: &'static str,
        timeout_secs: u64,
    },

    /// The long-lived `run` process exited before announcing readiness.
    #[error("cloudflared exited (status {exit_code:?}) before connecting")]
    AgentUnexpectedExit { exit_code: Option<i32> },

    /// The apex zone for a hostname is not managed by this token's account.
    #[error("no Cloudflare zone found for apex '{apex}'")]
    DnsZoneNotFound { apex: String },

    /// Propagation verification never reached quorum within its budget.
    #[error("DNS for '{hostname}' did not propagate to the expected target within budget")]
    DnsPropagationFailed { hostname: String },

    /// Health-time local probe is down and recovery attempts are exhausted.
    #[error("local port {port} is unreachable and recovery was exhausted")]
    LocalPortUnreachable { port: u16 },

    /// The Health Monitor hit its retry cap during auto-recovery.
    #[error("auto-recovery exhausted after {attempts} attempt(s)")]
    RecoveryExhausted { attempts: u32 },

    /// Catch-all for unclassified I/O, subprocess, or API failures.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LifecycleError {
    /// True for failures that the Coordinator should unwind via rollback,
    /// per spec.md §7's propagation policy. `DNS_CONFLICT` never reaches
    /// here, it is recovered locally by the reconciler and never surfaced.
    pub fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            LifecycleError::AgentTimeout { .. }
                | LifecycleError::AgentUnexpectedExit { .. }
                | LifecycleError::DnsZoneNotFound { .. }
                | LifecycleError::DnsPropagationFailed { .. }
        )
    }

    /// True for failures that mean named-tunnel mode is unavailable and the
    /// caller may want to fall back to another mode rather than retry.
    pub fn needs_interactive_login(&self) -> bool {
        matches!(self, LifecycleError::AuthMissingCert)
    }
}
