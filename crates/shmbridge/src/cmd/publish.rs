use std::thread;

use shmbridge_channel::{FrameWriter, PixelFormat};

use crate::cmd::{parse_duration, ChannelName, Pattern, PublishArgs};
use crate::exit::{channel_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_event, Event, OutputFormat};

pub fn run(args: PublishArgs, format: OutputFormat) -> CliResult<i32> {
    if args.width == 0 || args.height == 0 {
        return Err(CliError::new(USAGE, "width and height must be non-zero"));
    }
    let interval = parse_duration(&args.interval)?;
    let region = args
        .regions
        .open(ChannelName::Video, args.regions.attach())?;
    let mut writer =
        FrameWriter::new(region.clone()).map_err(|err| channel_error("attach failed", err))?;

    for n in 0..args.count {
        if n > 0 {
            thread::sleep(interval);
        }
        let pixels = render(args.pattern, args.width, args.height, n);
        let index = writer
            .publish(args.width, args.height, PixelFormat::Bgra8, 0, &pixels)
            .map_err(|err| channel_error("publish failed", err))?;
        print_event(
            &Event::Published {
                region: region.name(),
                index,
                width: args.width,
                height: args.height,
            },
            None,
            format,
        );
    }
    Ok(SUCCESS)
}

/// Tightly packed BGRA pixels for frame number `n`.
fn render(pattern: Pattern, width: u32, height: u32, n: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let shift = (n as usize).wrapping_mul(8);
    let mut pixels = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        for x in 0..w {
            let [b, g, r] = match pattern {
                Pattern::Gradient => [
                    ((x * 255 / w.max(1) + shift) % 256) as u8,
                    ((y * 255 / h.max(1) + shift) % 256) as u8,
                    (shift % 256) as u8,
                ],
                Pattern::Solid => [(shift % 256) as u8, 0x80, 0x40],
            };
            pixels.extend_from_slice(&[b, g, r, 0xff]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_is_tightly_packed_bgra() {
        let pixels = render(Pattern::Gradient, 3, 2, 0);
        assert_eq!(pixels.len(), 3 * 2 * 4);
        assert!(pixels.chunks_exact(4).all(|px| px[3] == 0xff));
        assert_eq!(&pixels[..4], &[0, 0, 0, 0xff]);
    }

    #[test]
    fn solid_frames_change_each_frame() {
        assert_ne!(
            render(Pattern::Solid, 1, 1, 0),
            render(Pattern::Solid, 1, 1, 1)
        );
    }
}
