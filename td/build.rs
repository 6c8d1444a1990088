//! Build script: bake a version descriptor into the binary.
//!
//! Prefers `git describe` so `conductor --version` reflects the exact
//! checkout; falls back to the crate version when not built inside a git
//! work tree (e.g. a published source tarball).

use std::process::Command;

fn main() {
    let describe = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let version = describe.unwrap_or_else(|| format!("v{}", env!("CARGO_PKG_VERSION")));
    println!("cargo:rustc-env=GIT_DESCRIBE={version}");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
