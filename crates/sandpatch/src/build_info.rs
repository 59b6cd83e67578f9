//! Build provenance reported over the get-build-info message.

/// The newline-delimited text block carried in the build-info response.
///
/// One `key: value` pair per line, ending with the `major minor revision`
/// triple. Values are baked in at compile time; anything the build
/// environment could not provide reads `unknown`.
pub fn block() -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "revision: {}\n",
        option_env!("SANDPATCH_GIT_HASH").unwrap_or("unknown")
    ));
    out.push_str(&format!(
        "compiler: {}\n",
        option_env!("SANDPATCH_RUSTC_VERSION").unwrap_or("unknown")
    ));
    out.push_str(&format!(
        "flags: {}\n",
        option_env!("SANDPATCH_RUSTFLAGS").unwrap_or("unknown")
    ));
    out.push_str(&format!(
        "target: {}\n",
        option_env!("SANDPATCH_BUILD_TARGET").unwrap_or("unknown")
    ));
    out.push_str(&format!(
        "build_date: {}\n",
        option_env!("SANDPATCH_BUILD_DATE").unwrap_or("unknown")
    ));
    out.push_str(&format!("tag: sandpatch-{}\n", env!("CARGO_PKG_VERSION")));
    out.push_str(&format!(
        "{} {} {}\n",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    ));
    out
}
