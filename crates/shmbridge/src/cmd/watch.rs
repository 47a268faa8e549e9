use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use shmbridge_channel::{AudioChunk, Command, ControlState, VideoFrame};
use shmbridge_poll::{ChannelHandler, CommandSource, PollConfig, PollLoop, StatusLine, Utterance};
use shmbridge_region::SharedRegion;
use tracing::info;

use crate::cmd::{parse_duration, ChannelName, WatchArgs};
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS, TIMEOUT};
use crate::output::{print_event, Event, OutputFormat};

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let config = poll_config(&args)?;
    let deadline = args.duration.as_deref().map(parse_duration).transpose()?;

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(stop.clone())?;
    if let Some(limit) = deadline {
        let timer = stop.clone();
        thread::spawn(move || {
            thread::sleep(limit);
            timer.store(true, Ordering::SeqCst);
        });
    }

    let printer = Printer {
        format,
        audio_chunks: args.audio_chunks,
        count: args.count,
        printed: 0,
        stop: stop.clone(),
    };
    let mut poll: PollLoop<Printer, Arc<SharedRegion>> = PollLoop::connect(config, printer);
    poll.run(&stop);

    let printer = poll.into_handler();
    match args.count {
        Some(count) if printer.printed < count => {
            info!(printed = printer.printed, count, "stopped before count was reached");
            Ok(TIMEOUT)
        }
        _ => Ok(SUCCESS),
    }
}

fn poll_config(args: &WatchArgs) -> CliResult<PollConfig> {
    let regions = &args.regions;
    let enabled = |channel: ChannelName| {
        args.channels
            .as_ref()
            .is_none_or(|channels| channels.contains(&channel))
    };
    let spec = |channel: ChannelName| -> CliResult<_> {
        if enabled(channel) {
            regions.spec(channel).map(Some)
        } else {
            Ok(None)
        }
    };

    let mut config = PollConfig::empty();
    config.video = spec(ChannelName::Video)?;
    config.audio = spec(ChannelName::Audio)?;
    config.text_commands = spec(ChannelName::Text)?;
    config.commands = spec(ChannelName::Command)?;
    config.state = spec(ChannelName::State)?;
    if args.wake_on_event && config.commands.is_some() {
        config.command_event = Some(regions.command_event.clone());
    }
    config.attach = regions.attach();
    config.region = regions.region_config();
    config.poll_interval = parse_duration(&args.poll_interval)?;
    config.reconnect_interval = parse_duration(&args.reconnect_interval)?;
    config.status_interval = if args.no_status {
        None
    } else {
        Some(parse_duration(&args.status_interval)?)
    };
    Ok(config)
}

/// Prints every event and stops the loop once `count` is reached.
struct Printer {
    format: OutputFormat,
    audio_chunks: bool,
    count: Option<u64>,
    printed: u64,
    stop: Arc<AtomicBool>,
}

impl Printer {
    fn emit(&mut self, event: Event<'_>, raw: Option<&[u8]>) {
        print_event(&event, raw, self.format);
        self.printed += 1;
        if self.count.is_some_and(|count| self.printed >= count) {
            self.stop.store(true, Ordering::SeqCst);
        }
    }
}

impl ChannelHandler for Printer {
    fn on_frame(&mut self, frame: &VideoFrame) {
        self.emit(Event::frame(frame), Some(&frame.pixels[..]));
    }

    fn on_audio(&mut self, chunk: &AudioChunk) {
        if self.audio_chunks {
            print_event(&Event::audio(chunk), Some(&chunk.samples[..]), self.format);
        }
    }

    fn on_utterance(&mut self, utterance: Utterance) {
        self.emit(Event::utterance(&utterance), None);
    }

    fn on_command(&mut self, source: CommandSource, command: &Command) {
        self.emit(Event::command(source, command), Some(&command.payload[..]));
    }

    fn on_state(&mut self, state: ControlState) {
        self.emit(Event::state(state), None);
    }

    fn on_status(&mut self, status: &StatusLine) {
        print_event(&Event::Status(status), None, self.format);
    }
}

fn install_ctrlc_handler(stop: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use shmbridge_channel::names;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: WatchArgs,
    }

    fn parse(argv: &[&str]) -> WatchArgs {
        let mut full = vec!["watch"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).expect("watch args should parse").args
    }

    #[test]
    fn selected_channels_only() {
        let args = parse(&["--channels", "text,state", "--no-status"]);
        let config = poll_config(&args).unwrap();
        assert!(config.video.is_none());
        assert!(config.commands.is_none());
        assert!(config.command_event.is_none());
        assert!(config.text_commands.is_some());
        assert!(config.state.is_some());
        assert!(config.status_interval.is_none());
    }

    #[test]
    fn intervals_are_parsed() {
        let args = parse(&["--poll-interval", "2ms", "--reconnect-interval", "250ms"]);
        let config = poll_config(&args).unwrap();
        assert_eq!(config.poll_interval, std::time::Duration::from_millis(2));
        assert_eq!(config.reconnect_interval, std::time::Duration::from_millis(250));
        assert_eq!(config.commands.unwrap().size, 4096);
        assert!(config.command_event.is_none());
    }

    #[test]
    fn command_event_is_opt_in() {
        let args = parse(&["--channels", "command", "--wake-on-event"]);
        let config = poll_config(&args).unwrap();
        assert_eq!(config.command_event.as_deref(), Some(names::COMMAND_EVENT));
    }
}
