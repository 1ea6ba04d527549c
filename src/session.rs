//! Upstream contract to the CLI shell (spec.md §6): the only surface this
//! crate exposes to the excluded command-line front end.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dns::CloudflareDnsClient;
use crate::error::LifecycleError;
use crate::health::{HealthCallbacks, HealthHandle, HealthMonitor, RecoveryTarget};
use crate::lifecycle::Coordinator;
use crate::model::SessionOptions;

/// `createSession(port, hostname?, options) -> TunnelSession | LifecycleError`
/// (spec.md §6). Drives one named-tunnel (or, with `hostname = None`,
/// quick-tunnel) transaction to completion and hands the result off to a
/// `HealthMonitor` running in the background.
///
/// `api_token` is threaded in rather than carried on `EngineConfig`; it is a
/// secret the excluded config-loading component owns, and `EngineConfig`
/// stays `Debug`-safe to log (spec.md §1: config loading is out of scope).
pub async fn create_session(
    local_port: u16,
    hostname: Option<&str>,
    api_token: impl Into<String>,
    config: EngineConfig,
    options: SessionOptions,
) -> Result<TunnelSession, LifecycleError> {
    let config = Arc::new(config);
    let dns_client = Arc::new(CloudflareDnsClient::new(api_token, config.token_cache_ttl));

    let committed = {
        let coordinator = Coordinator::new(&config, &dns_client);
        coordinator.create_session(local_port, hostname, &options).await?
    };

    let target = match committed.tunnel_id {
        Some(tunnel_id) => RecoveryTarget::Named {
            tunnel_id,
            hostname: hostname
                .expect("a named session always carries the hostname it was reconciled against")
                .to_string(),
        },
        None => RecoveryTarget::Quick,
    };

    let (health, join_handle) = HealthMonitor::spawn(
        Arc::clone(&config),
        Arc::clone(&dns_client),
        local_port,
        target,
        committed.agent,
        committed.public_url,
    );

    tracing::info!(
        port = local_port,
        process_alive = committed.post_commit.process_alive,
        dns_configured = committed.post_commit.dns_configured,
        "tunnel session committed; handed off to health monitor"
    );

    Ok(TunnelSession {
        tunnel_id: committed.tunnel_id,
        local_port,
        health,
        join_handle: Some(join_handle),
    })
}

/// The committed result (spec.md §3, §6): public URL, local port, agent
/// process handle (owned by the Health Monitor after handoff), and health
/// state. Lives until the caller calls `close()`.
pub struct TunnelSession {
    tunnel_id: Option<Uuid>,
    local_port: u16,
    health: HealthHandle,
    join_handle: Option<tokio::task::JoinHandle<()>>,
}

impl TunnelSession {
    /// Current public URL. Stable for named sessions; may change across a
    /// quick-tunnel auto-recovery, since a fresh `trycloudflare.com`
    /// subdomain is assigned on every respawn.
    pub async fn public_url(&self) -> String {
        self.health.public_url().await
    }

    pub fn tunnel_id(&self) -> Option<Uuid> {
        self.tunnel_id
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Registers the caller's health callback surface (spec.md §4.7).
    /// Replaces whatever callbacks were previously registered (the default,
    /// before any call, is a no-op).
    pub fn on_health(&self, callbacks: Arc<dyn HealthCallbacks>) {
        self.health.set_callbacks(callbacks);
    }

    /// Stops the Health Monitor and terminates the agent process (spec.md
    /// §5: on interrupt, "if committed, the Health Monitor stops and the
    /// agent is SIGTERMed with a 5s grace before SIGKILL").
    pub async fn close(mut self) {
        self.health.stop();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
        self.health.terminate_agent().await;
    }
}
