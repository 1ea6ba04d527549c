//! Black-box tests for the random-hostname fallback mode (spec.md §4.6,
//! §8-S6) against a fake `cloudflared --url` process.

mod common;

use std::time::Duration;

use common::write_script;
use tunnelkit::agent::quick_tunnel::spawn_quick_tunnel;
use tunnelkit::error::LifecycleError;

#[tokio::test]
async fn extracts_trycloudflare_url_from_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cloudflared",
        "#!/bin/sh\necho 'INF |  https://chosen-words-held.trycloudflare.com  |'\nsleep 5\n",
    );

    let (url, _child) = spawn_quick_tunnel(script.to_str().unwrap(), 8080, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(url, "https://chosen-words-held.trycloudflare.com");
}

#[tokio::test]
async fn extracts_trycloudflare_url_from_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "cloudflared",
        "#!/bin/sh\necho 'INF |  https://other-subdomain.trycloudflare.com  |' >&2\nsleep 5\n",
    );

    let (url, _child) = spawn_quick_tunnel(script.to_str().unwrap(), 8080, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(url, "https://other-subdomain.trycloudflare.com");
}

#[tokio::test]
async fn times_out_without_a_url() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cloudflared", "#!/bin/sh\nsleep 5\n");

    let result = spawn_quick_tunnel(script.to_str().unwrap(), 8080, Duration::from_millis(200)).await;
    assert!(matches!(result, Err(LifecycleError::AgentTimeout { .. })));
}

#[tokio::test]
async fn reports_unexpected_exit_before_a_url_appears() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "cloudflared", "#!/bin/sh\nexit 3\n");

    let result = spawn_quick_tunnel(script.to_str().unwrap(), 8080, Duration::from_secs(5)).await;
    assert!(matches!(
        result,
        Err(LifecycleError::AgentUnexpectedExit { exit_code: Some(3) })
    ));
}
