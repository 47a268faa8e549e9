use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use shmbridge_channel::names;
use shmbridge_poll::{AttachMode, RegionSpec};
use shmbridge_region::{AccessPolicy, RegionConfig, SharedRegion};

use crate::exit::{region_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod doctor;
pub mod envinfo;
pub mod inspect;
pub mod publish;
pub mod send;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll channels and print everything that arrives.
    Watch(WatchArgs),
    /// Read one channel once and print what is in it.
    Inspect(InspectArgs),
    /// Write a command and wake the reader.
    Send(SendArgs),
    /// Publish a synthetic video frame.
    PublishTestFrame(PublishArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local platform checks.
    Doctor(DoctorArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Watch(args) => watch::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::PublishTestFrame(args) => publish::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

/// The channels a command can address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChannelName {
    Video,
    Audio,
    /// Recognized text (text layout).
    Text,
    /// Typed commands (structured layout).
    Command,
    State,
}

/// Region names and sizes, shared by every subcommand that attaches.
#[derive(Args, Debug, Clone)]
pub struct RegionArgs {
    /// Video region name.
    #[arg(long, env = "SHMBRIDGE_VIDEO", default_value = names::VIDEO)]
    pub video: String,
    /// Video region size (bytes, or with a KiB/MiB suffix).
    #[arg(long, env = "SHMBRIDGE_VIDEO_SIZE", default_value = "16MiB")]
    pub video_size: String,
    /// Audio region name.
    #[arg(long, env = "SHMBRIDGE_AUDIO", default_value = names::AUDIO)]
    pub audio: String,
    #[arg(long, env = "SHMBRIDGE_AUDIO_SIZE", default_value = "4MiB")]
    pub audio_size: String,
    /// Recognized text region name.
    #[arg(long, env = "SHMBRIDGE_INPUT_TEXT", default_value = names::INPUT_TEXT)]
    pub input_text: String,
    #[arg(long, env = "SHMBRIDGE_INPUT_TEXT_SIZE", default_value = "4KiB")]
    pub input_text_size: String,
    /// Structured command region name.
    #[arg(long, env = "SHMBRIDGE_COMMAND", default_value = names::COMMAND)]
    pub command: String,
    #[arg(long, env = "SHMBRIDGE_COMMAND_SIZE", default_value = "4KiB")]
    pub command_size: String,
    /// Wake event paired with the command region.
    #[arg(long, env = "SHMBRIDGE_COMMAND_EVENT", default_value = names::COMMAND_EVENT)]
    pub command_event: String,
    /// Control-state region name.
    #[arg(long, env = "SHMBRIDGE_STATE", default_value = names::STATE)]
    pub state: String,
    /// Only attach to regions that already exist.
    #[arg(long, env = "SHMBRIDGE_OPEN_EXISTING")]
    pub open_existing: bool,
    /// Create objects with the platform's default permissions.
    #[arg(long, env = "SHMBRIDGE_INHERIT_ACL")]
    pub inherit_acl: bool,
}

impl RegionArgs {
    pub fn spec(&self, channel: ChannelName) -> CliResult<RegionSpec> {
        let (name, size) = match channel {
            ChannelName::Video => (&self.video, parse_size(&self.video_size)?),
            ChannelName::Audio => (&self.audio, parse_size(&self.audio_size)?),
            ChannelName::Text => (&self.input_text, parse_size(&self.input_text_size)?),
            ChannelName::Command => (&self.command, parse_size(&self.command_size)?),
            ChannelName::State => (&self.state, names::STATE_SIZE),
        };
        Ok(RegionSpec::new(name.clone(), size))
    }

    pub fn attach(&self) -> AttachMode {
        if self.open_existing {
            AttachMode::OpenExisting
        } else {
            AttachMode::OpenOrCreate
        }
    }

    pub fn region_config(&self) -> RegionConfig {
        RegionConfig {
            access: if self.inherit_acl {
                AccessPolicy::Inherit
            } else {
                AccessPolicy::Relaxed
            },
            ..RegionConfig::default()
        }
    }

    /// Attach to one channel's region.
    pub fn open(&self, channel: ChannelName, attach: AttachMode) -> CliResult<Arc<SharedRegion>> {
        let spec = self.spec(channel)?;
        let config = self.region_config();
        let region = match attach {
            AttachMode::OpenOrCreate => {
                SharedRegion::open_or_create_with_config(&spec.name, spec.size, &config)
            }
            AttachMode::OpenExisting => {
                SharedRegion::open_existing_with_config(&spec.name, spec.size, &config)
            }
        }
        .map_err(|err| region_error(&format!("cannot attach {}", spec.name), err))?;
        Ok(Arc::new(region))
    }
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub regions: RegionArgs,
    /// Channels to poll (comma-separated). Default: all.
    #[arg(long, value_delimiter = ',', value_enum)]
    pub channels: Option<Vec<ChannelName>>,
    /// Sleep between idle passes (e.g. 500us, 5ms).
    #[arg(long, env = "SHMBRIDGE_POLL_INTERVAL", default_value = "500us")]
    pub poll_interval: String,
    /// Retry interval for channels that are not available yet.
    #[arg(long, env = "SHMBRIDGE_RECONNECT_INTERVAL", default_value = "1s")]
    pub reconnect_interval: String,
    /// Print a status line this often.
    #[arg(long, default_value = "5s")]
    pub status_interval: String,
    /// Do not print status lines.
    #[arg(long)]
    pub no_status: bool,
    /// Wait on the command event between idle passes. The event wakes one
    /// reader, so leave this off while the browser is reading commands.
    #[arg(long)]
    pub wake_on_event: bool,
    /// Also print every audio chunk, not only utterances.
    #[arg(long)]
    pub audio_chunks: bool,
    /// Exit after N frames, commands, utterances or state changes.
    #[arg(long)]
    pub count: Option<u64>,
    /// Stop after this long (e.g. 10s).
    #[arg(long)]
    pub duration: Option<String>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Channel to read.
    #[arg(value_enum)]
    pub channel: ChannelName,
    #[command(flatten)]
    pub regions: RegionArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub regions: RegionArgs,
    #[command(subcommand)]
    pub what: SendCommand,
}

#[derive(Subcommand, Debug)]
pub enum SendCommand {
    /// Recognized text, on the text region.
    Text {
        text: String,
    },
    /// Replace the omnibox contents.
    Omnibox {
        text: String,
    },
    /// Switch the browser UI mode.
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Ask the browser to perform an action.
    Action {
        /// Action name, e.g. navigate or click.
        #[arg(required_unless_present = "json")]
        action: Option<String>,
        #[arg(long, conflicts_with = "json")]
        target: Option<String>,
        #[arg(long, conflicts_with = "json")]
        value: Option<String>,
        /// Full action request as JSON.
        #[arg(long, conflicts_with = "action")]
        json: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    Normal,
    Agent,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    #[command(flatten)]
    pub regions: RegionArgs,
    #[arg(long, default_value_t = 64)]
    pub width: u32,
    #[arg(long, default_value_t = 48)]
    pub height: u32,
    #[arg(long, value_enum, default_value = "gradient")]
    pub pattern: Pattern,
    /// Number of frames to publish.
    #[arg(long, default_value_t = 1)]
    pub count: u32,
    /// Delay between frames.
    #[arg(long, default_value = "33ms")]
    pub interval: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Pattern {
    /// Horizontal and vertical color ramps that shift each frame.
    Gradient,
    /// One flat color per frame.
    Solid,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}

/// Parse `500us`, `5ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("us") {
        (num, "us")
    } else if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "us" => Duration::from_micros(value),
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

/// Parse a byte count with an optional `KiB`/`MiB` suffix.
pub fn parse_size(input: &str) -> CliResult<usize> {
    let input = input.trim();
    let (number, multiplier) = if let Some(num) = input.strip_suffix("MiB") {
        (num, 1024 * 1024)
    } else if let Some(num) = input.strip_suffix("KiB") {
        (num, 1024)
    } else {
        (input, 1)
    };

    number
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .filter(|&n| n > 0)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid size: {input}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500us").unwrap(), Duration::from_micros(500));
        assert_eq!(parse_duration("5ms").unwrap(), Duration::from_millis(5));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("4KiB").unwrap(), 4096);
        assert_eq!(parse_size("16MiB").unwrap(), names::VIDEO_SIZE);
        assert!(parse_size("0").is_err());
        assert!(parse_size("lots").is_err());
    }
}
