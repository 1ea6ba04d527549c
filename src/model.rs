//! Shared data passed between the engine's own stages.
//!
//! Follows this crate's established shape for inter-stage payloads (compare
//! the old `BuildJob` / `StatusUpdate` types): plain `Clone + Debug` structs,
//! `serde`-derived where they cross a process or wire boundary.

use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stable public endpoint identified by a UUID and a human-readable name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tunnel {
    pub id: Uuid,
    pub name: String,
    pub credentials_path: PathBuf,
    pub ingress: Vec<IngressRule>,
}

/// One `(hostname?, service)` pair in a tunnel's ingress ruleset. A ruleset
/// is ordered, with exactly one terminal rule (`hostname: None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub service: String,
}

impl IngressRule {
    pub fn terminal() -> Self {
        Self {
            hostname: None,
            service: "http_status:404".to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.hostname.is_none()
    }
}

/// A DNS zone the user controls, identified by apex and provider-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub apex: String,
}

/// A DNS record type this engine cares about. Only `Cname` is ever written;
/// the others are recognized so conflicting records can be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Other,
}

impl RecordType {
    pub fn from_api_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "A" => RecordType::A,
            "AAAA" => RecordType::Aaaa,
            "CNAME" => RecordType::Cname,
            _ => RecordType::Other,
        }
    }
}

/// A single DNS record as returned by / sent to the Cloudflare API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: String,
    pub record_type: RecordType,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    pub proxied: bool,
}

/// What the reconciler did to bring a hostname's DNS into the target state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created { record_id: String },
    Unchanged { record_id: String },
    Updated { record_id: String },
    Replaced {
        record_id: String,
        previous_type: RecordType,
    },
}

impl ReconcileOutcome {
    pub fn record_id(&self) -> &str {
        match self {
            ReconcileOutcome::Created { record_id }
            | ReconcileOutcome::Unchanged { record_id }
            | ReconcileOutcome::Updated { record_id }
            | ReconcileOutcome::Replaced { record_id, .. } => record_id,
        }
    }
}

/// A compensating action pushed onto a transaction's rollback stack.
/// Popped and executed LIFO if the transaction unwinds.
#[derive(Debug, Clone)]
pub enum CompensatingAction {
    DeleteTunnel { tunnel_id: Uuid },
    DeleteDnsRecord { zone_id: String, record_id: String },
    RemoveConfigFile { path: PathBuf },
    TerminateAgent,
}

/// Caller-supplied knobs for one `create_session` call.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Skip interactive custom-hostname selection upstream; irrelevant to
    /// this engine beyond being threaded through to the caller's report.
    pub skip_domain_selection: bool,
    /// Whether to attempt installing the agent binary if missing. This
    /// engine only surfaces `AgentNotAvailable`; installation itself is the
    /// excluded CLI layer's responsibility.
    pub auto_install: bool,
    pub timeouts: Option<crate::config::TimeoutOverrides>,
}

/// Report produced by the Coordinator's post-commit verification pass
/// (spec.md §4.6, "Post-commit verification pass").
#[derive(Debug, Clone, Copy)]
pub struct PostCommitReport {
    pub process_alive: bool,
    pub dns_configured: bool,
}

/// Internal bookkeeping for how long a round-trip took, used only for the
/// `onHealthy(rtt)` callback signature from spec.md §4.7.
#[derive(Debug, Clone, Copy)]
pub struct Rtt(pub std::time::Duration);

/// Marker trait identifying an alternate tunnel backend. This crate
/// implements only the `cloudflared` path; the trait exists purely as a
/// documented extension seam (spec.md §1 lists alternative backends as
/// external collaborators sharing this contract) and has a single
/// implementation.
pub trait TunnelProvider {
    fn name(&self) -> &'static str;
}

/// Used internally to time a transaction's wall-clock duration for logs;
/// never serialized or persisted (spec.md: no cross-restart persistence).
#[derive(Debug, Clone, Copy)]
pub struct TransactionClock {
    pub started_at: Instant,
}

impl TransactionClock {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}
