//! Build script stamping build information into the `qc` binary.
//!
//! Compile-time environment variables:
//! - `QC_BUILD_TIMESTAMP`: UTC build time, ISO 8601
//! - `QC_GIT_COMMIT`: `git describe` of the source tree ("unknown" outside git)
//! - `QC_BUILD_PROFILE`: cargo profile (debug or release)

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    println!("cargo:rustc-env=QC_BUILD_TIMESTAMP={}", timestamp);

    let commit = git_describe().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=QC_GIT_COMMIT={}", commit);

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=QC_BUILD_PROFILE={}", profile);
}

/// Short commit id, suffixed `-dirty` for uncommitted changes.
fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let described = String::from_utf8(output.stdout).ok()?;
    Some(described.trim().to_string()).filter(|s| !s.is_empty())
}
