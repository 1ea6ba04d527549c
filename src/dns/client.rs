//! Zone/DNS Client (spec.md §4.3): typed wrapper over the Cloudflare DNS
//! HTTP API.
//!
//! Directly generalizes this crate's former
//! `worker/deploy/cloudflare.rs::CloudflareClient`: same base URL, same
//! `{success, result, errors[]}` envelope, same bearer-auth `reqwest`
//! client, broadened from "one fixed zone/tunnel" to "whatever zone and
//! record the Coordinator asks about", and adding `listZones` / `listRecords`
//! / `verifyToken`, which the teacher never needed because its zone and
//! tunnel were fixed at startup.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::model::{DnsRecord, RecordType, Zone};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";

#[derive(Debug, Deserialize)]
struct CloudflareResponse<T> {
    success: bool,
    result: T,
    #[serde(default)]
    errors: Vec<CloudflareApiError>,
}

#[derive(Debug, Deserialize)]
struct CloudflareApiError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ZoneApi {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DnsRecordApi {
    id: String,
    #[serde(rename = "type")]
    record_type: String,
    name: String,
    content: String,
    #[serde(default = "default_ttl")]
    ttl: u32,
    #[serde(default)]
    proxied: bool,
}

fn default_ttl() -> u32 {
    1
}

impl From<DnsRecordApi> for DnsRecord {
    fn from(api: DnsRecordApi) -> Self {
        DnsRecord {
            id: api.id,
            record_type: RecordType::from_api_str(&api.record_type),
            name: api.name,
            content: api.content,
            ttl: api.ttl,
            proxied: api.proxied,
        }
    }
}

#[derive(Debug, Serialize)]
struct UpsertDnsRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    content: &'a str,
    ttl: u32,
    proxied: bool,
}

/// Typed client over `https://api.cloudflare.com/client/v4`.
pub struct CloudflareDnsClient {
    http: reqwest::Client,
    token: String,
    token_cache_ttl: Duration,
    token_cache: Mutex<Option<(Instant, bool)>>,
    base_url: String,
}

impl CloudflareDnsClient {
    pub fn new(token: impl Into<String>, token_cache_ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            token_cache_ttl,
            token_cache: Mutex::new(None),
            base_url: API_BASE.to_string(),
        }
    }

    /// Same as `new`, pointed at a non-default base URL. Exists for test
    /// tooling (`wiremock`) to stand in for `api.cloudflare.com`; production
    /// callers always get `new`, which targets the real API.
    pub fn with_base_url(
        token: impl Into<String>,
        token_cache_ttl: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.into(),
            token_cache_ttl,
            token_cache: Mutex::new(None),
            base_url: base_url.into(),
        }
    }

    /// `GET /user/tokens/verify`, cached in memory for `token_cache_ttl`
    /// (spec.md §5: "cached in memory for 30s to avoid redundant round-trips").
    pub async fn verify_token(&self) -> Result<bool, LifecycleError> {
        if let Some((checked_at, valid)) = *self.token_cache.lock().unwrap() {
            if checked_at.elapsed() < self.token_cache_ttl {
                return Ok(valid);
            }
        }

        let url = format!("{}/user/tokens/verify", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| LifecycleError::Other(e.into()))?;

        let valid = response.status().is_success();
        *self.token_cache.lock().unwrap() = Some((Instant::now(), valid));
        Ok(valid)
    }

    /// `GET /zones?name=<apex>`.
    pub async fn find_zone(&self, apex: &str) -> Result<Option<Zone>, LifecycleError> {
        let url = format!("{}/zones?name={apex}", self.base_url);
        let envelope: CloudflareResponse<Vec<ZoneApi>> = self.get(&url).await?;
        Ok(envelope
            .result
            .into_iter()
            .next()
            .map(|z| Zone { id: z.id, apex: z.name }))
    }

    /// `GET /zones/<zoneId>/dns_records?name=<host>[&type=<type>]`.
    pub async fn list_records(
        &self,
        zone_id: &str,
        name: &str,
    ) -> Result<Vec<DnsRecord>, LifecycleError> {
        let url = format!("{}/zones/{zone_id}/dns_records?name={name}", self.base_url);
        let envelope: CloudflareResponse<Vec<DnsRecordApi>> = self.get(&url).await?;
        Ok(envelope.result.into_iter().map(DnsRecord::from).collect())
    }

    /// `POST /zones/<zoneId>/dns_records`.
    pub async fn create_record(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
    ) -> Result<DnsRecord, LifecycleError> {
        let url = format!("{}/zones/{zone_id}/dns_records", self.base_url);
        let body = UpsertDnsRecordBody {
            record_type: "CNAME",
            name,
            content,
            ttl: 1,
            proxied: false,
        };
        let envelope: CloudflareResponse<DnsRecordApi> = self.post(&url, &body).await?;
        Ok(envelope.result.into())
    }

    /// `PUT /zones/<zoneId>/dns_records/<recordId>`.
    pub async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        name: &str,
        content: &str,
    ) -> Result<DnsRecord, LifecycleError> {
        let url = format!("{}/zones/{zone_id}/dns_records/{record_id}", self.base_url);
        let body = UpsertDnsRecordBody {
            record_type: "CNAME",
            name,
            content,
            ttl: 1,
            proxied: false,
        };
        let envelope: CloudflareResponse<DnsRecordApi> = self.put(&url, &body).await?;
        Ok(envelope.result.into())
    }

    /// `DELETE /zones/<zoneId>/dns_records/<recordId>`.
    pub async fn delete_record(&self, zone_id: &str, record_id: &str) -> Result<(), LifecycleError> {
        let url = format!("{}/zones/{zone_id}/dns_records/{record_id}", self.base_url);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| LifecycleError::Other(e.into()))?;
        Self::ensure_envelope_success(response).await?;
        Ok(())
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<CloudflareResponse<T>, LifecycleError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| LifecycleError::Other(e.into()))?;
        Self::parse_envelope(response).await
    }

    async fn post<T: for<'de> Deserialize<'de>, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<CloudflareResponse<T>, LifecycleError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| LifecycleError::Other(e.into()))?;
        Self::parse_envelope(response).await
    }

    async fn put<T: for<'de> Deserialize<'de>, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<CloudflareResponse<T>, LifecycleError> {
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| LifecycleError::Other(e.into()))?;
        Self::parse_envelope(response).await
    }

    async fn parse_envelope<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<CloudflareResponse<T>, LifecycleError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LifecycleError::Other(e.into()))?;
        let envelope: CloudflareResponse<T> = serde_json::from_str(&body).map_err(|e| {
            LifecycleError::Other(anyhow::anyhow!(
                "failed to parse Cloudflare response ({status}): {e}: {body}"
            ))
        })?;
        if !status.is_success() || !envelope.success {
            let messages: Vec<&str> = envelope.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(LifecycleError::Other(anyhow::anyhow!(
                "Cloudflare API error {status}: {}",
                messages.join("; ")
            )));
        }
        Ok(envelope)
    }

    async fn ensure_envelope_success(response: reqwest::Response) -> Result<(), LifecycleError> {
        let _: CloudflareResponse<serde_json::Value> = Self::parse_envelope(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_parses_case_insensitively() {
        assert_eq!(RecordType::from_api_str("cname"), RecordType::Cname);
        assert_eq!(RecordType::from_api_str("CNAME"), RecordType::Cname);
        assert_eq!(RecordType::from_api_str("A"), RecordType::A);
        assert_eq!(RecordType::from_api_str("MX"), RecordType::Other);
    }
}
