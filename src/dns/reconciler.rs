//! DNS Reconciler (spec.md §4.4): idempotent "one CNAME under this hostname
//! points to this tunnel" operation.
//!
//! Grounded on this crate's former `central/worker_monitor.rs` retry-polling
//! shape (poll-until-condition with a fixed attempt budget and fixed
//! interval) repurposed here for "poll until a zone's conflicting records
//! are gone" rather than "poll until a worker heartbeats".

use std::time::Duration;

use crate::dns::client::CloudflareDnsClient;
use crate::error::LifecycleError;
use crate::model::{RecordType, ReconcileOutcome, Zone};

const REPLACE_POLL_ATTEMPTS: u32 = 5;
const REPLACE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Brings `hostname`'s DNS into the state described by the reconciler's
/// contract: exactly one CNAME record at `hostname`, content `target`,
/// `proxied = false`.
pub async fn reconcile(
    client: &CloudflareDnsClient,
    zone: &Zone,
    hostname: &str,
    target: &str,
) -> Result<ReconcileOutcome, LifecycleError> {
    let records = client.list_records(&zone.id, hostname).await?;

    match records.len() {
        0 => {
            let record = client.create_record(&zone.id, hostname, target).await?;
            Ok(ReconcileOutcome::Created {
                record_id: record.id,
            })
        }
        1 if records[0].record_type == RecordType::Cname && records[0].content == target => {
            Ok(ReconcileOutcome::Unchanged {
                record_id: records[0].id.clone(),
            })
        }
        1 if records[0].record_type == RecordType::Cname => {
            let record = client
                .update_record(&zone.id, &records[0].id, hostname, target)
                .await?;
            Ok(ReconcileOutcome::Updated { record_id: record.id })
        }
        _ => replace_conflicting(client, zone, hostname, target, &records).await,
    }
}

/// Step 6/7: delete every conflicting record, poll until the listing is
/// empty, then create the CNAME. `records` may hold one non-CNAME record or
/// several conflicting records of mixed type.
async fn replace_conflicting(
    client: &CloudflareDnsClient,
    zone: &Zone,
    hostname: &str,
    target: &str,
    records: &[crate::model::DnsRecord],
) -> Result<ReconcileOutcome, LifecycleError> {
    let previous_type = records[0].record_type;

    for record in records {
        client.delete_record(&zone.id, &record.id).await?;
    }

    for attempt in 0..REPLACE_POLL_ATTEMPTS {
        let remaining = client.list_records(&zone.id, hostname).await?;
        if remaining.is_empty() {
            break;
        }
        if attempt + 1 == REPLACE_POLL_ATTEMPTS {
            return Err(LifecycleError::Other(anyhow::anyhow!(
                "conflicting records at '{hostname}' did not clear after {REPLACE_POLL_ATTEMPTS} attempts"
            )));
        }
        tokio::time::sleep(REPLACE_POLL_INTERVAL).await;
    }

    let record = client.create_record(&zone.id, hostname, target).await?;
    Ok(ReconcileOutcome::Replaced {
        record_id: record.id,
        previous_type,
    })
}

// `reconcile()`'s decision table is exercised end-to-end, against a mocked
// Cloudflare API, in `tests/reconciler.rs` (idempotence, update, and
// conflict-replace paths) rather than with colocated unit tests here, since
// every branch of the table requires at least one HTTP round-trip.
