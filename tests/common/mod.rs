//! Shared helpers for black-box integration tests: writing small fake
//! `cloudflared` scripts so the Agent Driver and quick-tunnel fallback can be
//! exercised without a real Cloudflare account or the real binary.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Writes `body` as an executable script named `name` inside `dir` and
/// returns its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write fake cloudflared script");
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
