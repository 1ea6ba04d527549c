//! Black-box tests for the DNS Reconciler (spec.md §4.4) against a mocked
//! Cloudflare API, covering the testable properties in spec.md §8:
//! reconciler idempotence (invariant 3) and the conflict-replace path (S2).

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tunnelkit::dns::client::CloudflareDnsClient;
use tunnelkit::dns::reconciler::reconcile;
use tunnelkit::model::{RecordType, Zone};

const ZONE_ID: &str = "zone123";
const HOSTNAME: &str = "app.example.com";

fn zone() -> Zone {
    Zone {
        id: ZONE_ID.to_string(),
        apex: "example.com".to_string(),
    }
}

fn client(base_url: &str) -> CloudflareDnsClient {
    CloudflareDnsClient::with_base_url("fake-token", Duration::from_secs(30), base_url)
}

fn records_path() -> String {
    format!("/zones/{ZONE_ID}/dns_records")
}

fn envelope(result: serde_json::Value) -> serde_json::Value {
    json!({ "success": true, "errors": [], "result": result })
}

/// Invariant 3 (spec.md §8): `reconcile(h, t)` twice in succession yields
/// `created` then `unchanged`.
#[tokio::test]
async fn reconcile_is_idempotent() {
    let server = MockServer::start().await;
    let target = "11111111-1111-1111-1111-111111111111.cfargotunnel.com";

    Mock::given(method("GET"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "rec1",
            "type": "CNAME",
            "name": HOSTNAME,
            "content": target,
            "ttl": 1,
            "proxied": false
        }))))
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let first = reconcile(&client, &zone(), HOSTNAME, target).await.unwrap();
    assert_eq!(first.record_id(), "rec1");
    assert!(matches!(
        first,
        tunnelkit::model::ReconcileOutcome::Created { .. }
    ));

    server.reset().await;
    Mock::given(method("GET"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([{
            "id": "rec1",
            "type": "CNAME",
            "name": HOSTNAME,
            "content": target,
            "ttl": 1,
            "proxied": false
        }]))))
        .mount(&server)
        .await;

    let second = reconcile(&client, &zone(), HOSTNAME, target).await.unwrap();
    assert!(matches!(
        second,
        tunnelkit::model::ReconcileOutcome::Unchanged { .. }
    ));
}

/// A CNAME at the hostname pointing somewhere else is updated in place.
#[tokio::test]
async fn reconcile_updates_a_stale_cname() {
    let server = MockServer::start().await;
    let target = "22222222-2222-2222-2222-222222222222.cfargotunnel.com";

    Mock::given(method("GET"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([{
            "id": "rec1",
            "type": "CNAME",
            "name": HOSTNAME,
            "content": "old-target.cfargotunnel.com",
            "ttl": 1,
            "proxied": false
        }]))))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{}/rec1", records_path())))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "rec1",
            "type": "CNAME",
            "name": HOSTNAME,
            "content": target,
            "ttl": 1,
            "proxied": false
        }))))
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let outcome = reconcile(&client, &zone(), HOSTNAME, target).await.unwrap();
    assert!(matches!(
        outcome,
        tunnelkit::model::ReconcileOutcome::Updated { .. }
    ));
}

/// S2 (spec.md §8): a pre-existing A record is deleted and replaced with the
/// CNAME, once the poll-until-empty loop observes the deletion has taken
/// effect.
#[tokio::test]
async fn reconcile_replaces_a_conflicting_a_record() {
    let server = MockServer::start().await;
    let target = "33333333-3333-3333-3333-333333333333.cfargotunnel.com";

    Mock::given(method("GET"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([{
            "id": "rec-a",
            "type": "A",
            "name": HOSTNAME,
            "content": "1.2.3.4",
            "ttl": 1,
            "proxied": false
        }]))))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .with_priority(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{}/rec-a", records_path())))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({}))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(records_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "id": "rec-cname",
            "type": "CNAME",
            "name": HOSTNAME,
            "content": target,
            "ttl": 1,
            "proxied": false
        }))))
        .mount(&server)
        .await;

    let client = client(&server.uri());
    let outcome = reconcile(&client, &zone(), HOSTNAME, target).await.unwrap();
    match outcome {
        tunnelkit::model::ReconcileOutcome::Replaced { record_id, previous_type } => {
            assert_eq!(record_id, "rec-cname");
            assert_eq!(previous_type, RecordType::A);
        }
        other => panic!("expected Replaced, got {other:?}"),
    }
}

/// `verifyToken` is cached for the configured TTL, avoiding a second
/// round-trip on an immediate re-check (spec.md §5).
#[tokio::test]
async fn verify_token_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/tokens/verify"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"status": "active"}))))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server.uri());
    assert!(client.verify_token().await.unwrap());
    assert!(client.verify_token().await.unwrap());
    server.verify().await;
}
