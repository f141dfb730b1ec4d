use chrono::Utc;
use std::process::Command;

/// Repository root, two levels above this crate
const GIT_DIR: &str = "../../.git";

/// Short SHA of `HEAD`, if built from a git checkout
fn git_short_sha() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())?;

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

fn main() {
    // New commits move the branch ref, not HEAD
    println!("cargo:rerun-if-changed={GIT_DIR}/HEAD");
    println!("cargo:rerun-if-changed={GIT_DIR}/refs/heads");

    let date = Utc::now().format("%Y.%m.%d");
    let sha = git_short_sha().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=H2FCU_BUILD_ID={date}+g{sha}");
}
