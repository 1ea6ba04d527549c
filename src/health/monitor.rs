//! Health Monitor (spec.md §4.7): periodic liveness probe bound to a live
//! `TunnelSession`, with bounded auto-recovery.
//!
//! Generalizes this crate's former `central/worker_monitor.rs::WorkerMonitor`
//! from "HTTP GET each configured worker on a fixed interval, retrying new
//! workers with doubling backoff" to "probe one local port and one public
//! URL, and on sustained failure re-enter the lifecycle instead of just
//! logging a warning". The consecutive-failure counter and doubling-backoff
//! retry loop are carried over verbatim in shape.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::RunningAgent;
use crate::agent::quick_tunnel::spawn_quick_tunnel;
use crate::config::EngineConfig;
use crate::dns::CloudflareDnsClient;
use crate::error::LifecycleError;
use crate::lifecycle::Coordinator;
use crate::model::Rtt;

/// Callback surface for health-state transitions (spec.md §4.7). Callbacks
/// run on the monitor's own tick and must not block it; implementations
/// that need to do real work should hand off to their own channel/task.
pub trait HealthCallbacks: Send + Sync {
    fn on_healthy(&self, _rtt: Rtt) {}
    fn on_unhealthy(&self, _reason: &str, _consecutive: u32) {}
    fn on_recovering(&self, _attempt: u32) {}
    fn on_recovered(&self) {}
    fn on_max_retries_reached(&self) {}
}

/// Default no-op callbacks, installed until a caller supplies its own via
/// `TunnelSession::on_health`.
pub struct NoopCallbacks;
impl HealthCallbacks for NoopCallbacks {}

/// What `recover()` re-enters the lifecycle with, depending on which mode
/// produced the committed session (spec.md §4.6 named path vs §8-S6 quick
/// tunnel fallback).
#[derive(Debug, Clone)]
pub enum RecoveryTarget {
    Named { tunnel_id: Uuid, hostname: String },
    Quick,
}

struct MonitoredAgent {
    agent: RunningAgent,
    public_url: String,
}

/// Shared, cloneable controller a `TunnelSession` holds onto: lets the
/// caller read the (possibly recovery-updated) public URL, swap in its own
/// callbacks, and stop the monitor and its agent on `close()`.
#[derive(Clone)]
pub struct HealthHandle {
    state: Arc<tokio::sync::Mutex<MonitoredAgent>>,
    callbacks: Arc<StdMutex<Arc<dyn HealthCallbacks>>>,
    cancel: CancellationToken,
    terminate_grace: Duration,
}

impl HealthHandle {
    pub async fn public_url(&self) -> String {
        self.state.lock().await.public_url.clone()
    }

    pub fn set_callbacks(&self, callbacks: Arc<dyn HealthCallbacks>) {
        *self.callbacks.lock().unwrap() = callbacks;
    }

    /// Stops the tick loop. Callers await the monitor's `JoinHandle`
    /// afterwards to know the loop has actually exited.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// SIGTERMs (then SIGKILLs after the grace period) the agent currently
    /// held by the monitor. Used by `TunnelSession::close` (spec.md §5: "if
    /// committed, the Health Monitor stops and the agent is SIGTERMed with a
    /// 5s grace before SIGKILL").
    pub async fn terminate_agent(&self) {
        let mut state = self.state.lock().await;
        if let Err(e) = state.agent.terminate(self.terminate_grace).await {
            tracing::warn!(error = %e, "failed to terminate agent on session close");
        }
    }
}

/// Periodic checker bound to one committed session (spec.md §4.7).
pub struct HealthMonitor {
    engine_config: Arc<EngineConfig>,
    dns_client: Arc<CloudflareDnsClient>,
    local_port: u16,
    target: RecoveryTarget,
    state: Arc<tokio::sync::Mutex<MonitoredAgent>>,
    callbacks: Arc<StdMutex<Arc<dyn HealthCallbacks>>>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    /// Starts the tick loop as a background task and returns a `HealthHandle`
    /// the caller keeps, plus the task's `JoinHandle` for clean shutdown.
    pub fn spawn(
        engine_config: Arc<EngineConfig>,
        dns_client: Arc<CloudflareDnsClient>,
        local_port: u16,
        target: RecoveryTarget,
        agent: RunningAgent,
        public_url: String,
    ) -> (HealthHandle, tokio::task::JoinHandle<()>) {
        let state = Arc::new(tokio::sync::Mutex::new(MonitoredAgent { agent, public_url }));
        let callbacks: Arc<StdMutex<Arc<dyn HealthCallbacks>>> =
            Arc::new(StdMutex::new(Arc::new(NoopCallbacks)));
        let cancel = CancellationToken::new();

        let handle = HealthHandle {
            state: Arc::clone(&state),
            callbacks: Arc::clone(&callbacks),
            cancel: cancel.clone(),
            terminate_grace: engine_config.terminate_grace,
        };

        let monitor = HealthMonitor {
            engine_config,
            dns_client,
            local_port,
            target,
            state,
            callbacks,
            cancel,
        };

        let join = tokio::spawn(monitor.run());
        (handle, join)
    }

    fn callbacks(&self) -> Arc<dyn HealthCallbacks> {
        Arc::clone(&self.callbacks.lock().unwrap())
    }

    async fn run(self) {
        tracing::info!(
            port = self.local_port,
            interval_secs = self.engine_config.health_interval.as_secs(),
            "starting health monitor"
        );

        let mut ticker = tokio::time::interval(self.engine_config.health_interval);
        ticker.tick().await; // first tick fires immediately; skip it, the session was just verified

        let mut consecutive_down: u32 = 0;
        let mut recovery_attempts: u32 = 0;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(port = self.local_port, "health monitor stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            match self.probe_tick().await {
                Ok(()) => {
                    consecutive_down = 0;
                    self.callbacks().on_healthy(Rtt(started.elapsed()));
                }
                Err(reason) => {
                    consecutive_down += 1;
                    self.callbacks().on_unhealthy(&reason, consecutive_down);

                    if consecutive_down < self.engine_config.health_failure_threshold {
                        continue;
                    }
                    consecutive_down = 0;
                    recovery_attempts += 1;
                    self.callbacks().on_recovering(recovery_attempts);

                    match self.recover().await {
                        Ok(()) => {
                            recovery_attempts = 0;
                            self.callbacks().on_recovered();
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, attempt = recovery_attempts, "auto-recovery attempt failed");
                            if recovery_attempts >= self.engine_config.health_max_retries {
                                self.callbacks().on_max_retries_reached();
                                tracing::error!(
                                    port = self.local_port,
                                    attempts = recovery_attempts,
                                    "auto-recovery exhausted; health monitor stopping"
                                );
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// One tick: local-port probe and public-URL probe. Any HTTP response
    /// (including 4xx/5xx) counts as up; transport failures count as down
    /// (spec.md §4.7).
    async fn probe_tick(&self) -> Result<(), String> {
        self.probe_local_port().await?;
        let url = self.state.lock().await.public_url.clone();
        self.probe_url(&url, self.engine_config.health_probe_timeout).await
    }

    async fn probe_local_port(&self) -> Result<(), String> {
        let url = format!("http://localhost:{}/", self.local_port);
        self.probe_url(&url, self.engine_config.health_local_probe_timeout).await
    }

    async fn probe_url(&self, url: &str, timeout: Duration) -> Result<(), String> {
        http_probe(url, timeout).await
    }

    /// Auto-recovery (spec.md §4.7): terminate the agent, wait 5s, reverify
    /// the local port with a doubling backoff, then re-enter the lifecycle
    /// at `TUNNEL_CREATED` (named mode) or respawn a fresh quick tunnel.
    async fn recover(&self) -> Result<(), LifecycleError> {
        let mut state = self.state.lock().await;
        if let Err(e) = state.agent.terminate(self.engine_config.terminate_grace).await {
            tracing::warn!(error = %e, "recovery: failed to terminate previous agent");
        }
        drop(state);

        tokio::time::sleep(Duration::from_secs(5)).await;
        self.reverify_local_port().await?;

        match &self.target {
            RecoveryTarget::Named { tunnel_id, hostname } => {
                let coordinator = Coordinator::new(&self.engine_config, &self.dns_client);
                let agent = coordinator.recover(*tunnel_id, hostname, self.local_port).await?;
                let mut state = self.state.lock().await;
                state.agent = agent;
                state.public_url = format!("https://{hostname}");
            }
            RecoveryTarget::Quick => {
                let (url, child) = spawn_quick_tunnel(
                    &self.engine_config.agent_binary,
                    self.local_port,
                    self.engine_config.run_handshake_timeout,
                )
                .await?;
                let mut state = self.state.lock().await;
                state.agent = RunningAgent::Quick(child);
                state.public_url = url;
            }
        }
        Ok(())
    }

    /// Doubling-backoff local-port reverification (SPEC_FULL.md §4: jittered
    /// recovery backoff), a generalization of the fixed 5s wait spec.md
    /// names for the first reverification attempt.
    async fn reverify_local_port(&self) -> Result<(), LifecycleError> {
        const MAX_ATTEMPTS: u32 = 3;
        let mut delay = Duration::from_millis(500);
        let max_delay = Duration::from_secs(5);

        for attempt in 1..=MAX_ATTEMPTS {
            if self.probe_local_port().await.is_ok() {
                return Ok(());
            }
            if attempt == MAX_ATTEMPTS {
                return Err(LifecycleError::LocalPortUnreachable { port: self.local_port });
            }
            tokio::time::sleep(delay).await;
            delay = std::cmp::min(delay * 2, max_delay);
        }
        Ok(())
    }
}

/// Any HTTP response (including 4xx/5xx) counts as up; a transport-level
/// failure (connection refused, timeout, DNS failure) counts as down
/// (spec.md §4.7). Free function so it's testable without a full
/// `HealthMonitor`.
async fn http_probe(url: &str, timeout: Duration) -> Result<(), String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;
    client
        .get(url)
        .send()
        .await
        .map(|_response| ())
        .map_err(|e| e.to_string())
}
