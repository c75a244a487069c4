//! Logging setup, adapted from `flow_cli_common`'s `LogArgs`/`init_logging`.
//!
//! Argument parsing is the host's job, not this crate's (`spec.md` §1), so
//! there's no `clap::Args` here — just a level/format pair the embedder
//! decides however it likes (env var, its own flags, a config file) and
//! passes in directly.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Reads `RUST_LOG`, falling back to `Warn` — nbdkit plugins run
    /// detached from a terminal, so there's no flag parsing to hook into.
    pub fn from_env() -> Self {
        match std::env::var("RUST_LOG").as_deref() {
            Ok("trace") => LogLevel::Trace,
            Ok("debug") => LogLevel::Debug,
            Ok("info") => LogLevel::Info,
            Ok("error") => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

/// The format for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Logs written to stderr in jsonl format, for hosts that forward
    /// nbdkit plugin stderr into structured log pipelines.
    Json,
    /// Plain text with no colors — the default, since most nbdkit hosts
    /// capture stderr non-interactively.
    Text,
}

/// Initializes the global `tracing` subscriber. Panics if called twice.
pub fn init_logging(level: LogLevel, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(level.as_str())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_target(false);

    match format {
        LogFormat::Json => {
            builder.json().flatten_event(true).init();
        }
        LogFormat::Text => {
            builder.compact().with_ansi(false).init();
        }
    }
}
