use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};
use mirrorlink_session::SessionConfig;

use crate::exit::{session_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod connect;
pub mod host;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host a session and stream a synthetic test pattern.
    Host(HostArgs),
    /// Connect to a host and print received frames.
    Connect(ConnectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, config: Option<&Path>, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Host(args) => host::run(args, load_config(config)?, format),
        Command::Connect(args) => connect::run(args, load_config(config)?, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Address to listen on, e.g. 0.0.0.0:9000.
    pub addr: String,
    /// Frames per second to stream.
    #[arg(long, default_value_t = 30)]
    pub fps: u32,
    /// Test pattern width in pixels.
    #[arg(long, default_value_t = 320)]
    pub width: u32,
    /// Test pattern height in pixels.
    #[arg(long, default_value_t = 240)]
    pub height: u32,
    /// Stop after this long (e.g. 30s, 500ms). Default: run until interrupted.
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Host address, e.g. 192.168.1.20:9000.
    pub addr: String,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up if the frames have not arrived in time (e.g. 10s, 500ms).
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn load_config(path: Option<&Path>) -> CliResult<SessionConfig> {
    match path {
        Some(path) => SessionConfig::from_json_file(path)
            .map_err(|err| session_error(&format!("config {}", path.display()), err)),
        None => Ok(SessionConfig::default()),
    }
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn parse_duration_millis() {
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_duration_invalid() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert_eq!(parse_duration(" ").unwrap_err().code, USAGE);
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/mirrorlink.json"))).unwrap_err();
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("/nonexistent/mirrorlink.json"));
    }
}
