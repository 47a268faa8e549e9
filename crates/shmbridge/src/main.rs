mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "shmbridge",
    version,
    about = "Inspect and drive shared-memory browser/agent channels"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "SHMBRIDGE_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
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
    use crate::cmd::{ChannelName, SendCommand};

    #[test]
    fn parses_send_text() {
        let cli = Cli::try_parse_from(["shmbridge", "send", "text", "go to github.com"])
            .expect("send args should parse");
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert!(matches!(args.what, SendCommand::Text { text } if text == "go to github.com"));
    }

    #[test]
    fn region_flags_precede_send_kind() {
        let cli = Cli::try_parse_from([
            "shmbridge",
            "send",
            "--command",
            "Local\\Custom_Command",
            "mode",
            "agent",
        ])
        .expect("send args should parse");
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.regions.command, "Local\\Custom_Command");
    }

    #[test]
    fn rejects_conflicting_action_args() {
        let err = Cli::try_parse_from([
            "shmbridge",
            "send",
            "action",
            "navigate",
            "--json",
            "{\"action\":\"click\"}",
        ])
        .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_inspect_channel() {
        let cli = Cli::try_parse_from(["shmbridge", "inspect", "video", "--format", "json"])
            .expect("inspect args should parse");
        let Command::Inspect(args) = cli.command else {
            panic!("expected inspect");
        };
        assert_eq!(args.channel, ChannelName::Video);
        assert!(matches!(cli.format, Some(OutputFormat::Json)));
    }

    #[test]
    fn parses_watch_channel_list() {
        let cli = Cli::try_parse_from(["shmbridge", "watch", "--channels", "video,command"])
            .expect("watch args should parse");
        let Command::Watch(args) = cli.command else {
            panic!("expected watch");
        };
        assert_eq!(
            args.channels,
            Some(vec![ChannelName::Video, ChannelName::Command])
        );
    }
}
