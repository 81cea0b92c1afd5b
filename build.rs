//! Embeds the build metadata reported by the `/version` diagnostic.
//!
//! Each value may be pinned through a `*_OVERRIDE` env var, which container
//! builds without `.git` rely on. Anything unresolvable becomes `"unknown"`.

use std::process::Command;

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn emit(name: &str, value: Option<String>) {
    let value = std::env::var(format!("{name}_OVERRIDE"))
        .ok()
        .filter(|v| !v.is_empty())
        .or(value)
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env={name}={value}");
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    emit(
        "LIVEMOCK_GIT_SHORT",
        command_output("git", &["rev-parse", "--short", "HEAD"]),
    );
    emit(
        "LIVEMOCK_GIT_BRANCH",
        command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"]),
    );
    emit(
        "LIVEMOCK_BUILD_TIME",
        command_output("date", &["-u", "+%Y-%m-%dT%H:%M:%SZ"]),
    );
    emit("LIVEMOCK_BUILD_PROFILE", std::env::var("PROFILE").ok());
    emit("LIVEMOCK_TARGET", std::env::var("TARGET").ok());
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".into());
    emit("LIVEMOCK_RUSTC_VERSION", command_output(&rustc, &["--version"]));
}
