//! Browser-side producer: publishes test frames and a 440 Hz tone, and holds
//! push-to-talk for the middle second of each three.
//!
//! Run with:
//!   cargo run --example frame-producer
//!
//! In another terminal:
//!   cargo run --example agent-loop

use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shmbridge::channel::{
    names, AudioWriter, ControlState, FrameWriter, PixelFormat, SampleFormat, StateCell,
};
use shmbridge::region::SharedRegion;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const SAMPLE_RATE: u32 = 16_000;
const TICK: Duration = Duration::from_millis(33);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let video = Arc::new(SharedRegion::open_or_create(names::VIDEO, names::VIDEO_SIZE)?);
    let audio = Arc::new(SharedRegion::open_or_create(names::AUDIO, names::AUDIO_SIZE)?);
    let state = StateCell::new(SharedRegion::open_or_create(
        names::STATE,
        names::STATE_SIZE,
    )?);

    let mut frames = FrameWriter::new(video)?;
    let mut tone = AudioWriter::new(audio)?;
    let frames_per_tick = SAMPLE_RATE * TICK.as_millis() as u32 / 1000;
    let mut phase = 0f32;

    eprintln!("Publishing on {} and {}", names::VIDEO, names::AUDIO);
    let start = Instant::now();
    for n in 0u32.. {
        let listening = (start.elapsed().as_secs() % 3) == 1;
        state.write(if listening {
            ControlState::Listening
        } else {
            ControlState::Idle
        })?;

        let pixels: Vec<u8> = (0..WIDTH * HEIGHT)
            .flat_map(|i| {
                let x = (i % WIDTH).wrapping_add(n) as u8;
                [x, (i / WIDTH) as u8, 0x40, 0xff]
            })
            .collect();
        let index = frames.publish(WIDTH, HEIGHT, PixelFormat::Bgra8, 0, &pixels)?;

        let mut samples = Vec::with_capacity(frames_per_tick as usize * 2);
        for _ in 0..frames_per_tick {
            let value = (phase.sin() * i16::MAX as f32 * 0.2) as i16;
            samples.extend_from_slice(&value.to_le_bytes());
            phase = (phase + TAU * 440.0 / SAMPLE_RATE as f32) % TAU;
        }
        tone.publish(SAMPLE_RATE, 1, frames_per_tick, SampleFormat::PcmI16, &samples)?;

        if index % 30 == 0 {
            eprintln!("frame {index} listening={listening}");
        }
        thread::sleep(TICK);
    }
    Ok(())
}
