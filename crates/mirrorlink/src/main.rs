mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mirrorlink", version, about = "Remote session streaming CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Session configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "MIRRORLINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, cli.config.as_deref(), format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_subcommand() {
        let cli = Cli::try_parse_from([
            "mirrorlink",
            "host",
            "127.0.0.1:9000",
            "--fps",
            "15",
            "--width",
            "64",
        ])
        .expect("host args should parse");

        match cli.command {
            Command::Host(args) => {
                assert_eq!(args.addr, "127.0.0.1:9000");
                assert_eq!(args.fps, 15);
                assert_eq!(args.width, 64);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_connect_with_global_config() {
        let cli = Cli::try_parse_from([
            "mirrorlink",
            "connect",
            "localhost:9000",
            "--count",
            "3",
            "--config",
            "/tmp/session.json",
        ])
        .expect("connect args should parse");

        assert!(matches!(cli.command, Command::Connect(ref args) if args.count == Some(3)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/session.json")));
    }

    #[test]
    fn rejects_unknown_log_format() {
        let err = Cli::try_parse_from(["mirrorlink", "--log-format", "xml", "version"])
            .expect_err("unknown log format should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
