use shmbridge_channel::{AudioReader, CommandLayout, CommandReader, FrameReader, StateCell};
use shmbridge_poll::{AttachMode, CommandSource};

use crate::cmd::{ChannelName, InspectArgs};
use crate::exit::{channel_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, Event, OutputFormat};

/// One stateless read. Never creates a region; an empty slot exits with
/// `FAILURE`.
pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let region = args.regions.open(args.channel, AttachMode::OpenExisting)?;
    let name = region.name().to_string();
    let context = format!("read {name}");

    let printed = match args.channel {
        ChannelName::Video => {
            let reader = FrameReader::new(region);
            match reader
                .capture_current()
                .map_err(|err| channel_error(&context, err))?
            {
                Some(frame) => {
                    print_event(&Event::frame(&frame), Some(&frame.pixels[..]), format);
                    true
                }
                None => false,
            }
        }
        ChannelName::Audio => {
            let mut reader = AudioReader::new(region);
            match reader.poll_new().map_err(|err| channel_error(&context, err))? {
                Some(chunk) => {
                    print_event(&Event::audio(&chunk), Some(&chunk.samples[..]), format);
                    true
                }
                None => false,
            }
        }
        ChannelName::Text | ChannelName::Command => {
            let (layout, source) = if args.channel == ChannelName::Text {
                (CommandLayout::Text, CommandSource::Text)
            } else {
                (CommandLayout::Structured, CommandSource::Structured)
            };
            let reader = CommandReader::new(region, layout);
            match reader
                .read_if_newer(0)
                .map_err(|err| channel_error(&context, err))?
            {
                Some(command) => {
                    print_event(
                        &Event::command(source, &command),
                        Some(&command.payload[..]),
                        format,
                    );
                    true
                }
                None => false,
            }
        }
        ChannelName::State => {
            let cell = StateCell::new(region);
            let state = cell.read().map_err(|err| channel_error(&context, err))?;
            let raw = state.to_wire().to_le_bytes();
            print_event(&Event::state(state), Some(&raw[..]), format);
            true
        }
    };

    if printed {
        Ok(SUCCESS)
    } else {
        print_event(&Event::Empty { region: &name }, None, format);
        Ok(FAILURE)
    }
}
