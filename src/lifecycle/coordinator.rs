//! Lifecycle Coordinator (spec.md §4.6): the transactional driver that
//! sequences the Agent Driver, Config Materializer, DNS Reconciler/Client,
//! and Propagation Verifier, recording rollback steps and committing or
//! unwinding.

use uuid::Uuid;

use crate::agent::quick_tunnel::spawn_quick_tunnel;
use crate::agent::session::AgentSession;
use crate::agent::{RouteDnsOutcome, RunOutcome, RunningAgent};
use crate::config::EngineConfig;
use crate::dns::client::CloudflareDnsClient;
use crate::dns::reconciler::reconcile;
use crate::dns::verifier::{verify, PropagationStatus, VerifierConfig};
use crate::error::LifecycleError;
use crate::lifecycle::transaction::{Transaction, TransactionState};
use crate::model::{CompensatingAction, PostCommitReport, ReconcileOutcome, SessionOptions};

/// Result of a successfully committed transaction, handed back to the
/// caller as the basis of a `TunnelSession`.
pub struct CommittedSession {
    pub tunnel_id: Option<Uuid>,
    pub public_url: String,
    pub agent: RunningAgent,
    pub post_commit: PostCommitReport,
}

/// Drives one transaction at a time. Not `Sync`-shared across concurrent
/// sessions for the same user profile (spec.md §5: "two concurrent sessions
/// against the same user profile race on the shared config file... and are
/// undefined behavior").
pub struct Coordinator<'a> {
    config: &'a EngineConfig,
    dns_client: &'a CloudflareDnsClient,
    session: AgentSession,
}

impl<'a> Coordinator<'a> {
    pub fn new(config: &'a EngineConfig, dns_client: &'a CloudflareDnsClient) -> Self {
        Self {
            config,
            dns_client,
            session: AgentSession::new(config),
        }
    }

    /// Entry point for `engine::create_session`. Runs the full transaction;
    /// on any rollback-triggering failure, unwinds recorded compensating
    /// actions before returning the error.
    pub async fn create_session(
        &self,
        local_port: u16,
        hostname: Option<&str>,
        options: &SessionOptions,
    ) -> Result<CommittedSession, LifecycleError> {
        if hostname.is_none() {
            return self.create_quick_session(local_port, options).await;
        }
        let hostname = hostname.unwrap();

        let mut tx = Transaction::start();
        match self.named_session_inner(local_port, hostname, options, &mut tx).await {
            Ok(committed) => {
                tracing::info!(
                    hostname,
                    elapsed_ms = tx.clock.elapsed().as_millis() as u64,
                    "named-tunnel session committed"
                );
                Ok(committed)
            }
            Err((err, agent)) => {
                if err.triggers_rollback() {
                    tracing::warn!(hostname, error = %err, "rolling back transaction");
                    self.rollback(&mut tx, agent).await;
                }
                Err(err)
            }
        }
    }

    async fn named_session_inner(
        &self,
        local_port: u16,
        hostname: &str,
        options: &SessionOptions,
        tx: &mut Transaction,
    ) -> Result<CommittedSession, (LifecycleError, Option<RunningAgent>)> {
        if !self.session.has_origin_cert(&self.config.cert_path()).await {
            return Err((LifecycleError::AuthMissingCert, None));
        }
        let token_ok = self.dns_client.verify_token().await.map_err(|e| (e, None))?;
        if !token_ok {
            return Err((LifecycleError::AuthBadToken, None));
        }
        tx.advance(TransactionState::AuthVerified);

        let create_timeout = options
            .timeouts
            .and_then(|t| t.create)
            .unwrap_or(self.config.create_timeout);
        let tunnel_name = format!("tunnelkit-{}", Uuid::new_v4());
        let tunnel_id = self
            .session
            .create_tunnel(&tunnel_name, create_timeout)
            .await
            .map_err(|e| (e, None))?;
        tx.record(CompensatingAction::DeleteTunnel { tunnel_id });
        tx.advance(TransactionState::TunnelCreated);

        self.session
            .write_named_tunnel_config(tunnel_id, hostname, local_port)
            .await
            .map_err(|e| (LifecycleError::Other(e), None))?;
        tx.record(CompensatingAction::RemoveConfigFile {
            path: self.session.config_path().to_path_buf(),
        });
        tx.advance(TransactionState::ConfigWritten);

        let target = format!("{tunnel_id}.cfargotunnel.com");
        self.reconcile_dns(tunnel_id, hostname, &target, tx)
            .await
            .map_err(|e| (e, None))?;
        tx.advance(TransactionState::DnsReconciled);

        let verify_budget = VerifierConfig {
            max_rounds: self.config.verify_max_rounds,
            retry_interval_base: self.config.verify_backoff_base,
            https_timeout: self.config.verify_https_timeout,
        };
        let status = verify(hostname, &target, &verify_budget)
            .await
            .map_err(|e| (LifecycleError::Other(e), None))?;
        if status == PropagationStatus::NotVerified {
            return Err((
                LifecycleError::DnsPropagationFailed {
                    hostname: hostname.to_string(),
                },
                None,
            ));
        }
        tx.advance(TransactionState::DnsVerified);

        let handshake_timeout = options
            .timeouts
            .and_then(|t| t.run_handshake)
            .unwrap_or(self.config.run_handshake_timeout);
        let (run_outcome, handle) = self
            .session
            .run(handshake_timeout)
            .await
            .map_err(|e| (e, None))?;

        match run_outcome {
            RunOutcome::Connected => {}
            RunOutcome::ExitedBeforeConnect { exit_code } => {
                return Err((LifecycleError::AgentUnexpectedExit { exit_code }, None));
            }
            RunOutcome::TimedOut => {
                if !handle.is_alive() {
                    return Err((
                        LifecycleError::AgentTimeout {
                            subcommand: "tunnel run",
                            timeout_secs: handshake_timeout.as_secs(),
                        },
                        Some(RunningAgent::Named(handle)),
                    ));
                }
            }
        }
        tx.record(CompensatingAction::TerminateAgent);
        tx.advance(TransactionState::AgentRunning);
        tx.advance(TransactionState::Committed);

        let agent = RunningAgent::Named(handle);
        let post_commit = self.post_commit_check(hostname, &target, &agent).await;

        Ok(CommittedSession {
            tunnel_id: Some(tunnel_id),
            public_url: format!("https://{hostname}"),
            agent,
            post_commit,
        })
    }

    /// Random-hostname fallback (spec.md §4.6/§8-S6): no DNS, no config
    /// file, no rollback stack; there is nothing transactional to unwind.
    async fn create_quick_session(
        &self,
        local_port: u16,
        options: &SessionOptions,
    ) -> Result<CommittedSession, LifecycleError> {
        let timeout = options
            .timeouts
            .and_then(|t| t.run_handshake)
            .unwrap_or(self.config.run_handshake_timeout);
        let (url, child) = spawn_quick_tunnel(&self.config.agent_binary, local_port, timeout).await?;
        let agent = RunningAgent::Quick(child);
        let post_commit = PostCommitReport {
            process_alive: agent.is_alive(),
            dns_configured: true,
        };
        Ok(CommittedSession {
            tunnel_id: None,
            public_url: url,
            agent,
            post_commit,
        })
    }

    /// Tries `routeDns` first; on `CONFLICT` falls back to the full
    /// reconciler (spec.md §4.4: "the reconciler is the authoritative
    /// path... an optimization the Coordinator tries first").
    async fn reconcile_dns(
        &self,
        tunnel_id: Uuid,
        hostname: &str,
        target: &str,
        tx: &mut Transaction,
    ) -> Result<ReconcileOutcome, LifecycleError> {
        match self.session.route_dns(tunnel_id, hostname).await? {
            RouteDnsOutcome::Ok => {
                let apex = apex_of(hostname);
                if let Some(zone) = self.dns_client.find_zone(&apex).await? {
                    if let Some(record) =
                        self.dns_client.list_records(&zone.id, hostname).await?.into_iter().next()
                    {
                        tx.record(CompensatingAction::DeleteDnsRecord {
                            zone_id: zone.id,
                            record_id: record.id.clone(),
                        });
                        return Ok(ReconcileOutcome::Created { record_id: record.id });
                    }
                }
                Ok(ReconcileOutcome::Created {
                    record_id: String::new(),
                })
            }
            RouteDnsOutcome::Conflict => {
                let apex = apex_of(hostname);
                let zone = self
                    .dns_client
                    .find_zone(&apex)
                    .await?
                    .ok_or(LifecycleError::DnsZoneNotFound { apex })?;
                let outcome = reconcile(self.dns_client, &zone, hostname, target).await?;
                if let ReconcileOutcome::Replaced { previous_type, .. } = &outcome {
                    tracing::warn!(
                        hostname,
                        previous_type = ?previous_type,
                        "replaced pre-existing DNS record; original content is not recoverable on rollback"
                    );
                }
                if matches!(
                    outcome,
                    ReconcileOutcome::Created { .. } | ReconcileOutcome::Replaced { .. }
                ) {
                    tx.record(CompensatingAction::DeleteDnsRecord {
                        zone_id: zone.id,
                        record_id: outcome.record_id().to_string(),
                    });
                }
                Ok(outcome)
            }
            RouteDnsOutcome::Other(message) => Err(LifecycleError::Other(anyhow::anyhow!(
                "route_dns failed: {message}"
            ))),
        }
    }

    /// Post-commit verification pass (spec.md §4.6): light re-check that
    /// never aborts the commit, since the session is now the Health
    /// Monitor's responsibility.
    async fn post_commit_check(
        &self,
        hostname: &str,
        target: &str,
        agent: &RunningAgent,
    ) -> PostCommitReport {
        let process_alive = agent.is_alive();
        let budget = VerifierConfig {
            max_rounds: self.config.post_commit_verify_rounds,
            retry_interval_base: self.config.post_commit_verify_backoff,
            https_timeout: self.config.verify_https_timeout,
        };
        let dns_configured = matches!(
            verify(hostname, target, &budget).await,
            Ok(PropagationStatus::Verified)
        );
        PostCommitReport {
            process_alive,
            dns_configured,
        }
    }

    /// Re-enters the lifecycle at `TUNNEL_CREATED` for the Health Monitor's
    /// auto-recovery path (spec.md §4.7): the tunnel itself is reused, only
    /// the config/DNS/agent steps are redone.
    pub async fn recover(
        &self,
        tunnel_id: Uuid,
        hostname: &str,
        local_port: u16,
    ) -> Result<RunningAgent, LifecycleError> {
        self.session
            .write_named_tunnel_config(tunnel_id, hostname, local_port)
            .await
            .map_err(LifecycleError::Other)?;

        let target = format!("{tunnel_id}.cfargotunnel.com");
        let mut scratch_tx = Transaction::start();
        self.reconcile_dns(tunnel_id, hostname, &target, &mut scratch_tx).await?;

        let verify_budget = VerifierConfig {
            max_rounds: self.config.verify_max_rounds,
            retry_interval_base: self.config.verify_backoff_base,
            https_timeout: self.config.verify_https_timeout,
        };
        let status = verify(hostname, &target, &verify_budget)
            .await
            .map_err(LifecycleError::Other)?;
        if status == PropagationStatus::NotVerified {
            return Err(LifecycleError::DnsPropagationFailed {
                hostname: hostname.to_string(),
            });
        }

        let (run_outcome, handle) = self.session.run(self.config.run_handshake_timeout).await?;
        match run_outcome {
            RunOutcome::Connected => {}
            RunOutcome::ExitedBeforeConnect { exit_code } => {
                return Err(LifecycleError::AgentUnexpectedExit { exit_code });
            }
            RunOutcome::TimedOut if !handle.is_alive() => {
                return Err(LifecycleError::AgentTimeout {
                    subcommand: "tunnel run",
                    timeout_secs: self.config.run_handshake_timeout.as_secs(),
                });
            }
            RunOutcome::TimedOut => {}
        }

        Ok(RunningAgent::Named(handle))
    }

    async fn rollback(&self, tx: &mut Transaction, agent: Option<RunningAgent>) {
        tx.advance(TransactionState::RollingBack);
        let mut agent = agent;
        for action in tx.drain_rollback() {
            match action {
                CompensatingAction::TerminateAgent => {
                    if let Some(mut running) = agent.take() {
                        if let Err(e) = running.terminate(self.config.terminate_grace).await {
                            tracing::warn!(error = %e, "rollback: failed to terminate agent");
                        }
                    }
                }
                CompensatingAction::DeleteDnsRecord { zone_id, record_id } => {
                    if record_id.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.dns_client.delete_record(&zone_id, &record_id).await {
                        tracing::warn!(error = %e, "rollback: failed to delete dns record");
                    }
                }
                CompensatingAction::RemoveConfigFile { path } => {
                    if let Err(e) = crate::agent::config_file::remove(&path).await {
                        tracing::warn!(error = %e, "rollback: failed to remove config file");
                    }
                }
                CompensatingAction::DeleteTunnel { tunnel_id } => {
                    if let Err(e) = self.session.delete_tunnel(tunnel_id).await {
                        tracing::warn!(error = %e, "rollback: failed to delete tunnel");
                    }
                }
            }
        }
        tx.advance(TransactionState::RolledBack);
    }
}

/// Zone apex as "rightmost two labels" (spec.md §4.3, documented limitation
/// for multi-label public suffixes, see §9).
fn apex_of(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() <= 2 {
        hostname.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apex_of_takes_last_two_labels() {
        assert_eq!(apex_of("app.example.com"), "example.com");
        assert_eq!(apex_of("a.b.c.example.com"), "example.com");
        assert_eq!(apex_of("example.com"), "example.com");
    }

    #[test]
    fn apex_of_known_limitation_on_public_suffixes() {
        // Documented limitation (spec.md §9): multi-label public suffixes
        // like `co.uk` are misclassified without a public-suffix list.
        assert_eq!(apex_of("app.example.co.uk"), "co.uk");
    }
}
