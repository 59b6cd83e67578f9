use std::process::Command;

fn capture(cmd: &str, args: &[&str]) -> Option<String> {
    let out = Command::new(cmd).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8(out.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn main() {
    if let Ok(target) = std::env::var("TARGET") {
        println!("cargo:rustc-env=SANDPATCH_BUILD_TARGET={target}");
    }
    if let Some(rustc) = capture("rustc", &["--version"]) {
        println!("cargo:rustc-env=SANDPATCH_RUSTC_VERSION={rustc}");
    }
    if let Some(hash) = capture("git", &["rev-parse", "--short", "HEAD"]) {
        println!("cargo:rustc-env=SANDPATCH_GIT_HASH={hash}");
    }
    if let Some(date) = capture("date", &["-u", "+%Y-%m-%d"]) {
        println!("cargo:rustc-env=SANDPATCH_BUILD_DATE={date}");
    }
    // Cargo passes extra rustc flags unit-separated; fall back to the
    // plain variable for builds invoked outside cargo's wrapper.
    let flags = std::env::var("CARGO_ENCODED_RUSTFLAGS")
        .map(|raw| raw.split('\x1f').collect::<Vec<_>>().join(" "))
        .ok()
        .filter(|f| !f.trim().is_empty())
        .or_else(|| std::env::var("RUSTFLAGS").ok().filter(|f| !f.trim().is_empty()));
    if let Some(flags) = flags {
        println!("cargo:rustc-env=SANDPATCH_RUSTFLAGS={flags}");
    }
    println!("cargo:rerun-if-env-changed=TARGET");
    println!("cargo:rerun-if-env-changed=CARGO_ENCODED_RUSTFLAGS");
    println!("cargo:rerun-if-env-changed=RUSTFLAGS");
}
