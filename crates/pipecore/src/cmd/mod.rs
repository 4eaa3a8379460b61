use std::path::Path;
use std::time::Duration;

use clap::{Args, Subcommand};
use pipecore::system::CoreConfig;
use tracing::debug;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod limits;
pub mod pingpong;
pub mod stream;
pub mod ticks;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Sample the monotonic clock.
    Ticks(TicksArgs),
    /// Echo messages through a message pipe and report round-trip latency.
    Pingpong(PingpongArgs),
    /// Stream bytes through a data pipe and report throughput.
    Stream(StreamArgs),
    /// Print the effective core limits.
    Limits(LimitsArgs),
    /// Run pipe self-checks against a fresh core.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat, config: CoreConfig) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Ticks(args) => ticks::run(args, format),
        Command::Pingpong(args) => pingpong::run(args, format, config),
        Command::Stream(args) => stream::run(args, format, config),
        Command::Limits(args) => limits::run(args, format, config),
        Command::Doctor(args) => doctor::run(args, format, config),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct TicksArgs {
    /// Number of samples to take.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub samples: u32,
    /// Pause between samples (e.g. 1ms, 250us).
    #[arg(long, default_value = "1ms")]
    pub interval: String,
}

#[derive(Args, Debug)]
pub struct PingpongArgs {
    /// Number of round trips.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub count: u64,
    /// Payload size in bytes.
    #[arg(long, default_value_t = 64)]
    pub size: usize,
    /// Maximum wait for each reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct StreamArgs {
    /// Total bytes to push through the pipe.
    #[arg(long, default_value_t = 16 * 1024 * 1024, value_parser = clap::value_parser!(u64).range(1..))]
    pub bytes: u64,
    /// Data pipe capacity in bytes. Default: the configured default capacity.
    #[arg(long)]
    pub capacity: Option<usize>,
    /// Largest single write in bytes.
    #[arg(long, default_value_t = 64 * 1024, value_parser = clap::value_parser!(u64).range(1..))]
    pub chunk: u64,
    /// Maximum time without progress (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug, Default)]
pub struct LimitsArgs {}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

/// Load limits from `path`, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> CliResult<CoreConfig> {
    let Some(path) = path else {
        return Ok(CoreConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("read config {}", path.display()), err))?;
    let config: CoreConfig = serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("parse config {}: {err}", path.display()),
        )
    })?;
    config.validate().map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })?;

    debug!(path = %path.display(), "loaded core config");
    Ok(config)
}

/// Parse `5s`, `150ms` or `250us`; a bare number means seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix("us") {
        (num, "us")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        "us" => Duration::from_micros(value),
        _ => Duration::from_secs(value),
    })
}
