//! Stderr logging for the daemon and the client-side subcommands.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Environment override for the log filter. Takes a full tracing
/// directive string, e.g. `SANDPATCH_LOG=sandpatch_engine=trace,info`,
/// so a long-running daemon can be restarted with per-crate filtering
/// the `--log-level` flag cannot express.
pub const LOG_ENV_VAR: &str = "SANDPATCH_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// The environment wins over the `--log-level` flag when it holds a
/// parseable directive; otherwise the flag's level applies globally.
fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter_for(level))
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns LOG_ENV_VAR; tests run in parallel and the variable
    // is process-wide.
    #[test]
    fn environment_directive_overrides_the_flag() {
        std::env::remove_var(LOG_ENV_VAR);
        assert_eq!(filter_for(LogLevel::Debug).to_string(), "debug");

        std::env::set_var(LOG_ENV_VAR, "sandpatch_engine=trace");
        assert_eq!(
            filter_for(LogLevel::Error).to_string(),
            "sandpatch_engine=trace"
        );
        std::env::remove_var(LOG_ENV_VAR);
    }
}
