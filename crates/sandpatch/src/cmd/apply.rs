use sandpatch::client::SandboxClient;
use sandpatch::format::PatchFile;
use sandpatch::wire::{CANARY_LEN, HASH_LEN};

use crate::cmd::{cleanup_identity, default_identity, ApplyArgs};
use crate::exit::{client_error, format_error, CliError, CliResult, REFUSED, SUCCESS, USAGE};
use crate::output::{print_patch_file, print_status, OutputFormat};

pub fn run(args: ApplyArgs, format: OutputFormat) -> CliResult<i32> {
    let file = PatchFile::load(&args.file)
        .map_err(|err| format_error("container rejected", err))?;

    if let (Some(version), Some(date)) = (&args.target_version, &args.target_compile_date) {
        file.check_compatible(version, date)
            .map_err(|err| format_error("compatibility gate", err))?;
    }

    let Some(socket) = &args.socket else {
        // Verification-only mode: the container parsed, hashed, and
        // (when requested) gated clean.
        print_patch_file(&file, format);
        return Ok(SUCCESS);
    };

    let canary = parse_hex::<CANARY_LEN>(
        args.canary_hex
            .as_deref()
            .ok_or_else(|| CliError::new(USAGE, "--canary-hex is required with --socket"))?,
        "--canary-hex",
    )?;
    let build_id = match args.build_id_hex.as_deref() {
        Some(hex) => parse_hex::<HASH_LEN>(hex, "--build-id-hex")?,
        None => [0u8; HASH_LEN],
    };

    let [func] = &file.functions[..] else {
        return Err(CliError::new(
            USAGE,
            format!(
                "socket submission needs exactly one function patch, container has {}",
                file.functions.len()
            ),
        ));
    };
    if !file.relocations.is_empty() {
        // The apply request carries no relocation table; a blob that
        // still needs fixups cannot be expressed over the socket.
        return Err(CliError::new(
            USAGE,
            "container carries relocations; submit it on the daemon host instead",
        ));
    }
    let descriptor = file
        .descriptor_for(func, build_id, canary)
        .map_err(|err| format_error("request construction", err))?;

    let identity = args.identity.clone().unwrap_or_else(default_identity);
    let mut client = SandboxClient::connect(socket, &identity)
        .map_err(|err| client_error("connect failed", err))?;
    let status = client
        .apply(&descriptor)
        .map_err(|err| client_error("apply failed", err));
    cleanup_identity(&identity);
    let status = status?;

    print_status("apply", status, format);
    Ok(if status.is_ok() { SUCCESS } else { REFUSED })
}

fn parse_hex<const N: usize>(input: &str, flag: &str) -> CliResult<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(input, &mut out)
        .map_err(|_| CliError::new(USAGE, format!("{flag} must be {} hex digits", 2 * N)))?;
    Ok(out)
}
