//! Engine configuration.
//!
//! Mirrors this crate's previous `CentralConfig` / `WorkerConfig` split: a
//! plain `Clone + Debug` struct with sensible defaults, populated by the
//! embedding application rather than read from the environment by the
//! library itself (env/file loading is the excluded config-loading
//! component, spec.md §1).

use std::path::PathBuf;
use std::time::Duration;

/// Per-subcommand and per-phase timeout overrides (spec.md §4.1, §4.5–4.7).
#[derive(Debug, Clone, Copy)]
pub struct TimeoutOverrides {
    pub create: Option<Duration>,
    pub run_handshake: Option<Duration>,
    pub https_probe: Option<Duration>,
}

/// Top-level knobs for the lifecycle engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Executable name or absolute path for the tunnel agent.
    pub agent_binary: String,

    /// Directory holding `cert.pem`, `<tunnel_id>.json`, and the routing
    /// config file. Defaults to the platform's `cloudflared` user config dir.
    pub agent_config_dir: PathBuf,

    /// Timeout for `tunnel create` (spec.md §4.1 default: 30s).
    pub create_timeout: Duration,

    /// Timeout for the `tunnel run` handshake (spec.md §4.1/§4.6 default: 60s).
    pub run_handshake_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL when terminating the agent
    /// (spec.md §4.6/§5 default: 5s).
    pub terminate_grace: Duration,

    /// Propagation verifier: max rounds (spec.md §4.5 default: 6).
    pub verify_max_rounds: u32,
    /// Propagation verifier: linear backoff base (spec.md §4.5 default: 5s).
    pub verify_backoff_base: Duration,
    /// Propagation verifier: HTTPS probe timeout (spec.md §4.5 default: 10s).
    pub verify_https_timeout: Duration,

    /// Post-commit verification pass budget (spec.md §4.6: 3 rounds x 2s).
    pub post_commit_verify_rounds: u32,
    pub post_commit_verify_backoff: Duration,

    /// Health Monitor tick interval (spec.md §4.7 default: 30s).
    pub health_interval: Duration,
    /// Health Monitor: consecutive down ticks before recovery (default: 3).
    pub health_failure_threshold: u32,
    /// Health Monitor: max auto-recovery attempts (default: 3).
    pub health_max_retries: u32,
    /// Health Monitor: public-URL probe timeout (spec.md §4.7 default: 15s).
    pub health_probe_timeout: Duration,
    /// Health Monitor: local-port probe timeout. Not named explicitly in
    /// spec.md (which only budgets the public-URL probe); kept short since
    /// the target is always `localhost`.
    pub health_local_probe_timeout: Duration,

    /// Token verification cache TTL (spec.md §5 default: 30s).
    pub token_cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_binary: "cloudflared".to_string(),
            agent_config_dir: Self::default_config_dir(),
            create_timeout: Duration::from_secs(30),
            run_handshake_timeout: Duration::from_secs(60),
            terminate_grace: Duration::from_secs(5),
            verify_max_rounds: 6,
            verify_backoff_base: Duration::from_secs(5),
            verify_https_timeout: Duration::from_secs(10),
            post_commit_verify_rounds: 3,
            post_commit_verify_backoff: Duration::from_secs(2),
            health_interval: Duration::from_secs(30),
            health_failure_threshold: 3,
            health_max_retries: 3,
            health_probe_timeout: Duration::from_secs(15),
            health_local_probe_timeout: Duration::from_secs(5),
            token_cache_ttl: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    fn default_config_dir() -> PathBuf {
        dirs_config_dir().join(".cloudflared")
    }

    pub fn cert_path(&self) -> PathBuf {
        self.agent_config_dir.join("cert.pem")
    }

    pub fn credentials_path(&self, tunnel_id: uuid::Uuid) -> PathBuf {
        self.agent_config_dir.join(format!("{}.json", tunnel_id))
    }

    pub fn routing_config_path(&self) -> PathBuf {
        self.agent_config_dir.join("config.yml")
    }
}

/// Small builder so callers can override only the knobs they care about,
/// the way this crate's `CentralConfig::from_env_and_args` layered
/// CLI-supplied overrides onto environment defaults.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    agent_binary: Option<String>,
    agent_config_dir: Option<PathBuf>,
}

impl EngineConfigBuilder {
    pub fn agent_binary(mut self, binary: impl Into<String>) -> Self {
        self.agent_binary = Some(binary.into());
        self
    }

    pub fn agent_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.agent_config_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> EngineConfig {
        let mut config = EngineConfig::default();
        if let Some(binary) = self.agent_binary {
            config.agent_binary = binary;
        }
        if let Some(dir) = self.agent_config_dir {
            config.agent_config_dir = dir;
        }
        config
    }
}

fn dirs_config_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home);
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_spec_timeouts() {
        let config = EngineConfig::default();
        assert_eq!(config.create_timeout, Duration::from_secs(30));
        assert_eq!(config.run_handshake_timeout, Duration::from_secs(60));
        assert_eq!(config.verify_max_rounds, 6);
        assert_eq!(config.health_max_retries, 3);
    }

    #[test]
    fn builder_overrides_only_requested_fields() {
        let config = EngineConfig::builder()
            .agent_binary("/usr/local/bin/cloudflared")
            .build();
        assert_eq!(config.agent_binary, "/usr/local/bin/cloudflared");
        assert_eq!(config.health_interval, Duration::from_secs(30));
    }

    #[test]
    fn credentials_path_uses_tunnel_id() {
        let config = EngineConfig::builder().agent_config_dir("/tmp/cf").build();
        let id = uuid::Uuid::nil();
        assert_eq!(
            config.credentials_path(id),
            PathBuf::from("/tmp/cf/00000000-0000-0000-0000-000000000000.json")
        );
    }
}
