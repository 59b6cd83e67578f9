use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use sandpatch::build_info;
use sandpatch::engine::{CodeMemory, MappedSandbox, PatchEngine, SandboxRegion};
use sandpatch::server::{PatchListener, ServerState};
use sandpatch::wire::{FieldConfig, MAX_PATCH_SIZE};

use crate::cmd::ServeArgs;
use crate::exit::{transport_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::OutputFormat;

pub fn run(args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    if args.sandbox_size < MAX_PATCH_SIZE {
        return Err(CliError::new(
            USAGE,
            format!("--sandbox-size must be at least {MAX_PATCH_SIZE} bytes"),
        ));
    }
    let timeout = parse_duration(&args.timeout)?;

    let mem = MappedSandbox::new(args.sandbox_size)
        .map_err(|err| CliError::new(INTERNAL, format!("sandbox mapping failed: {err}")))?;
    let region = SandboxRegion::new(mem.base(), mem.len());
    info!(
        base = format_args!("{:#x}", region.base()),
        size = region.size(),
        "sandbox region mapped"
    );
    let state = ServerState::new(PatchEngine::new(mem, region), build_info::block());

    let config = FieldConfig {
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
    };
    let listener = PatchListener::bind_with_config(&args.socket, config)
        .map_err(|err| transport_error("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    listener
        .serve(&state, &running)
        .map_err(|err| transport_error("serve failed", err))?;
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
    }
}
