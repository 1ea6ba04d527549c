//! Black-box tests for the Agent Driver (spec.md §4.1) against a fake
//! `cloudflared` script, exercising the `create`/`routeDns`/`run` contracts
//! without a real binary or account.

mod common;

use std::time::Duration;

use common::write_script;
use tunnelkit::agent::driver::{AgentDriver, RouteDnsOutcome, RunOutcome};

#[tokio::test]
async fn create_extracts_tunnel_id_from_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cloudflared",
        "#!/bin/sh\necho 'INF Created tunnel my-tunnel with id 6ba7b810-9dad-11d1-80b4-00c04fd430c8'\nexit 0\n",
    );
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let id = driver
        .create("my-tunnel", Duration::from_secs(5))
        .await
        .expect("tunnel id should be parsed");
    assert_eq!(id.to_string(), "6ba7b810-9dad-11d1-80b4-00c04fd430c8");
}

#[tokio::test]
async fn create_times_out_when_no_signal_is_emitted() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cloudflared", "#!/bin/sh\nsleep 5\n");
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let result = driver.create("slow-tunnel", Duration::from_millis(200)).await;
    assert!(matches!(
        result,
        Err(tunnelkit::error::LifecycleError::AgentTimeout { subcommand: "tunnel create", .. })
    ));
}

#[tokio::test]
async fn route_dns_reports_conflict_from_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cloudflared",
        "#!/bin/sh\necho 'API Error Code 1003: record already exists' >&2\nexit 1\n",
    );
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let outcome = driver
        .route_dns(uuid::Uuid::new_v4(), "app.example.com")
        .await
        .unwrap();
    assert_eq!(outcome, RouteDnsOutcome::Conflict);
}

#[tokio::test]
async fn route_dns_reports_ok_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cloudflared", "#!/bin/sh\nexit 0\n");
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let outcome = driver
        .route_dns(uuid::Uuid::new_v4(), "app.example.com")
        .await
        .unwrap();
    assert_eq!(outcome, RouteDnsOutcome::Ok);
}

#[tokio::test]
async fn route_dns_reports_other_for_unrecognized_failures() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cloudflared",
        "#!/bin/sh\necho 'permission denied' >&2\nexit 1\n",
    );
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let outcome = driver
        .route_dns(uuid::Uuid::new_v4(), "app.example.com")
        .await
        .unwrap();
    assert!(matches!(outcome, RouteDnsOutcome::Other(_)));
}

/// S4 agent startup race (spec.md §8): the agent emits the connection-ready
/// line on stderr, then exits some time later. The handshake must resolve
/// on the log line, not wait for the exit.
#[tokio::test]
async fn run_resolves_on_handshake_line_even_though_process_exits_later() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cloudflared",
        "#!/bin/sh\necho 'INF Registered tunnel connection connIndex=0' >&2\nsleep 2\nexit 0\n",
    );
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let started = std::time::Instant::now();
    let (outcome, handle) = driver.run(Duration::from_secs(10)).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Connected));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "handshake should resolve immediately on the log line, not wait for exit"
    );

    // The process exits later; this must not retroactively flip the outcome
    // (spec.md §4.6: "subsequent ones are dropped").
    let mut exit_rx = handle.exit_watch();
    tokio::time::timeout(Duration::from_secs(5), exit_rx.changed())
        .await
        .expect("process should eventually exit")
        .unwrap();
    assert!(exit_rx.borrow().is_some());
}

#[tokio::test]
async fn run_reports_unexpected_exit_before_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cloudflared", "#!/bin/sh\nexit 7\n");
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let (outcome, _handle) = driver.run(Duration::from_secs(5)).await.unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::ExitedBeforeConnect { exit_code: Some(7) }
    ));
}

#[tokio::test]
async fn run_times_out_when_process_hangs_silently() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cloudflared", "#!/bin/sh\nsleep 5\n");
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    let (outcome, handle) = driver.run(Duration::from_millis(200)).await.unwrap();
    assert!(matches!(outcome, RunOutcome::TimedOut));
    assert!(handle.is_alive());
    handle.terminate(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn delete_succeeds_on_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cloudflared", "#!/bin/sh\nexit 0\n");
    let driver = AgentDriver::new(script.to_str().unwrap(), dir.path().join("config.yml"));

    driver.delete(uuid::Uuid::new_v4()).await.unwrap();
}
