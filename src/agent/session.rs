//! Agent session (spec.md §9, Design Notes: "Config-file coupling").
//!
//! Because every subcommand must use the same `--config`, the Config
//! Materializer and Agent Driver are bundled into one abstraction
//! parameterized by that single path, rather than exposed as independent
//! utilities a caller could accidentally use with mismatched paths.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::agent::config_file::{self, RoutingConfig};
use crate::agent::driver::{AgentDriver, AgentHandle, RouteDnsOutcome, RunOutcome};
use crate::config::EngineConfig;
use crate::error::LifecycleError;

pub struct AgentSession {
    driver: AgentDriver,
    config_path: PathBuf,
    config_dir: PathBuf,
}

impl AgentSession {
    pub fn new(engine_config: &EngineConfig) -> Self {
        let config_path = engine_config.routing_config_path();
        Self {
            driver: AgentDriver::new(engine_config.agent_binary.clone(), config_path.clone()),
            config_path,
            config_dir: engine_config.agent_config_dir.clone(),
        }
    }

    pub async fn has_origin_cert(&self, cert_path: &std::path::Path) -> bool {
        config_file::has_origin_cert(cert_path).await
    }

    pub async fn create_tunnel(&self, name: &str, timeout: Duration) -> Result<Uuid, LifecycleError> {
        self.driver.create(name, timeout).await
    }

    pub async fn delete_tunnel(&self, tunnel_id: Uuid) -> anyhow::Result<()> {
        self.driver.delete(tunnel_id).await
    }

    pub async fn route_dns(
        &self,
        tunnel_id: Uuid,
        hostname: &str,
    ) -> Result<RouteDnsOutcome, LifecycleError> {
        self.driver.route_dns(tunnel_id, hostname).await
    }

    /// Writes the routing config for a single-hostname named tunnel using
    /// this session's shared config path.
    pub async fn write_named_tunnel_config(
        &self,
        tunnel_id: Uuid,
        hostname: &str,
        local_port: u16,
    ) -> anyhow::Result<()> {
        let credentials_file = config_file::credentials_path(&self.config_dir, tunnel_id);
        let config =
            RoutingConfig::for_named_tunnel(tunnel_id, credentials_file, hostname, local_port);
        config.write(&self.config_path).await
    }

    /// Writes the routing config for the random-hostname fallback mode
    /// (spec.md §4.6: agent spawned with `--url` instead, no config write
    /// required there, kept for symmetry should a caller want one).
    pub async fn remove_config(&self) -> anyhow::Result<()> {
        config_file::remove(&self.config_path).await
    }

    pub fn config_path(&self) -> &std::path::Path {
        &self.config_path
    }

    pub async fn run(&self, handshake_timeout: Duration) -> Result<(RunOutcome, AgentHandle), LifecycleError> {
        self.driver.run(handshake_timeout).await
    }
}
