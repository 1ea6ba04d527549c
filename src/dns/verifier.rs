//! Propagation Verifier (spec.md §4.5): multi-resolver CNAME verification
//! with quorum and linear backoff, plus a best-effort HTTPS bonus probe.
//!
//! Resolver setup follows the `TokioAsyncResolver::tokio(ResolverConfig,
//! ResolverOpts)` pattern this corpus uses for DNS lookups; `cache_size = 0`
//! is carried over so repeated rounds within one verification never read a
//! stale cached answer.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use hickory_resolver::config::{NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationStatus {
    Verified,
    NotVerified,
}

pub struct VerifierConfig {
    pub max_rounds: u32,
    pub retry_interval_base: Duration,
    pub https_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_rounds: 6,
            retry_interval_base: Duration::from_secs(5),
            https_timeout: Duration::from_secs(10),
        }
    }
}

fn resolver_for(ip: Ipv4Addr) -> TokioAsyncResolver {
    let mut opts = ResolverOpts::default();
    opts.cache_size = 0;
    let group = NameServerConfigGroup::from(vec![NameServerConfig {
        socket_addr: SocketAddr::new(IpAddr::V4(ip), 53),
        protocol: Protocol::Udp,
        tls_dns_name: None,
        trust_negative_responses: false,
        bind_addr: None,
    }]);
    let config = ResolverConfig::from_parts(None, vec![], group);
    TokioAsyncResolver::tokio(config, opts)
}

fn system_resolver() -> anyhow::Result<TokioAsyncResolver> {
    let mut opts = ResolverOpts::default();
    opts.cache_size = 0;
    Ok(TokioAsyncResolver::tokio(ResolverConfig::default(), opts))
}

/// One CNAME query against one resolver. Returns the resolved target
/// (without its trailing root label) or `None` on NXDOMAIN/timeout/error.
async fn query_cname(resolver: &TokioAsyncResolver, hostname: &str) -> Option<String> {
    let lookup = resolver.lookup(hostname, RecordType::CNAME).await.ok()?;
    lookup.record_iter().find_map(|record| match record.data() {
        Some(RData::CNAME(name)) => Some(name.to_utf8().trim_end_matches('.').to_string()),
        _ => None,
    })
}

/// One round: query all three resolvers concurrently, pass iff >= 2 of 3
/// resolved `expected_target` exactly.
async fn round_passes(resolvers: &[TokioAsyncResolver], hostname: &str, expected_target: &str) -> bool {
    let results = futures::future::join_all(
        resolvers.iter().map(|r| query_cname(r, hostname)),
    )
    .await;
    let matches = results
        .iter()
        .filter(|r| r.as_deref() == Some(expected_target))
        .count();
    matches >= 2
}

/// Best-effort HTTPS bonus probe, per spec.md §4.5: never affects the
/// `verified` outcome. HEAD first; some origins reject HEAD (405/501), so
/// those fall back to a single GET before giving up.
async fn bonus_https_probe(hostname: &str, timeout: Duration) -> bool {
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(c) => c,
        Err(_) => return false,
    };
    let url = format!("https://{hostname}");
    let status = match client.head(&url).send().await {
        Ok(response) => response.status().as_u16(),
        Err(_) => return false,
    };
    if status == 405 || status == 501 {
        return match client.get(&url).send().await {
            Ok(response) => (200..500).contains(&response.status().as_u16()),
            Err(_) => false,
        };
    }
    (200..500).contains(&status)
}

/// Verifies that `hostname` resolves (via CNAME) to `expected_target`
/// across a quorum of resolvers within `config`'s round budget.
pub async fn verify(
    hostname: &str,
    expected_target: &str,
    config: &VerifierConfig,
) -> anyhow::Result<PropagationStatus> {
    let resolvers = vec![
        resolver_for(Ipv4Addr::new(1, 1, 1, 1)),
        resolver_for(Ipv4Addr::new(8, 8, 8, 8)),
        system_resolver()?,
    ];

    for round in 1..=config.max_rounds {
        if round_passes(&resolvers, hostname, expected_target).await {
            bonus_https_probe(hostname, config.https_timeout).await;
            return Ok(PropagationStatus::Verified);
        }
        if round < config.max_rounds {
            tokio::time::sleep(config.retry_interval_base * round).await;
        }
    }

    Ok(PropagationStatus::NotVerified)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_budget() {
        let config = VerifierConfig::default();
        assert_eq!(config.max_rounds, 6);
        assert_eq!(config.retry_interval_base, Duration::from_secs(5));
        assert_eq!(config.https_timeout, Duration::from_secs(10));
    }

    #[test]
    fn bonus_probe_status_range_is_inclusive_200_exclusive_500() {
        assert!((200..500).contains(&200));
        assert!((200..500).contains(&499));
        assert!(!(200..500).contains(&500));
        assert!(!(200..500).contains(&199));
    }
}
