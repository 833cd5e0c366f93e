//! Build script to capture build-time information for the `version` subcommand

use std::process::Command;

fn main() {
    if let Ok(output) = Command::new("git").args(["rev-parse", "--short", "HEAD"]).output() {
        let git_hash = String::from_utf8(output.stdout).unwrap_or_default().trim().to_string();
        println!("cargo:rustc-env=WORKFLOW_CLI_GIT_HASH={}", git_hash);
    }

    let build_timestamp = if let Ok(output) = Command::new("date").args(["+%Y-%m-%dT%H:%M:%S%z"]).output() {
        String::from_utf8(output.stdout).unwrap_or_default().trim().to_string()
    } else {
        "unknown".to_string()
    };
    println!("cargo:rustc-env=WORKFLOW_CLI_BUILD_TIMESTAMP={}", build_timestamp);

    let profile = std::env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=WORKFLOW_CLI_BUILD_PROFILE={}", profile);

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
