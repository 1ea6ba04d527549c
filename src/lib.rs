//! tunnelkit: named-tunnel lifecycle engine.
//!
//! Orchestrates the `cloudflared` agent and the Cloudflare DNS HTTP API to
//! publish a local TCP port behind a public HTTPS URL: a transactional state
//! machine coordinates subprocess control, zone-level DNS reconciliation,
//! authoritative propagation verification, and health-driven recovery, with
//! safe rollback on any partial failure. The command-line front end,
//! alternative tunnel backends, config-file loading, and daemonization are
//! all out of scope; this crate is the engine they'd embed.

pub mod agent;
pub mod config;
pub mod dns;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod model;
pub mod session;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::LifecycleError;
pub use health::HealthCallbacks;
pub use model::SessionOptions;
pub use session::{create_session, TunnelSession};
