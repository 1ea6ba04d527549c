//! Config Materializer (spec.md §4.2): writes the agent's routing config and
//! locates its credential files.
//!
//! `RoutingConfig` mirrors this crate's `shared/types.rs` convention of
//! serde-deriving a plain struct for anything written to or read from a
//! file boundary; here the encoding is the agent's YAML dialect
//! (`serde_yaml`) rather than JSON.

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use crate::model::IngressRule;

/// The three top-level keys the agent's routing config file requires
/// (spec.md §4.2, §6).
#[derive(Debug, Clone, Serialize)]
pub struct RoutingConfig {
    pub tunnel: Uuid,
    #[serde(rename = "credentials-file")]
    pub credentials_file: PathBuf,
    pub ingress: Vec<IngressRule>,
}

impl RoutingConfig {
    /// Builds the config for a single-hostname named tunnel: one rule
    /// routing `hostname` to `http://localhost:<port>`, terminated by the
    /// mandatory catch-all (spec.md §3: "exactly one terminal rule").
    pub fn for_named_tunnel(
        tunnel_id: Uuid,
        credentials_file: PathBuf,
        hostname: &str,
        local_port: u16,
    ) -> Self {
        Self {
            tunnel: tunnel_id,
            credentials_file,
            ingress: vec![
                IngressRule {
                    hostname: Some(hostname.to_string()),
                    service: format!("http://localhost:{local_port}"),
                },
                IngressRule::terminal(),
            ],
        }
    }

    /// Writes this config to `path`, rewriting any existing file (spec.md
    /// §4.2: "The file is rewritten on every transaction").
    pub async fn write(&self, path: &Path) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }
}

/// True if the origin certificate is present, the sole INIT-state signal
/// for "the user is logged in" (spec.md §4.6, §6).
pub async fn has_origin_cert(cert_path: &Path) -> bool {
    tokio::fs::metadata(cert_path).await.is_ok()
}

/// Per-tunnel credentials path, created by `create` and referenced
/// absolutely from the routing config (spec.md §6).
pub fn credentials_path(config_dir: &Path, tunnel_id: Uuid) -> PathBuf {
    config_dir.join(format!("{tunnel_id}.json"))
}

/// Best-effort removal of the routing config file, the `ConfigWritten`
/// state's compensating action (spec.md §4.6).
pub async fn remove(path: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
