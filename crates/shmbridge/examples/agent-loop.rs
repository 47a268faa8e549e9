//! Agent-side consumer: polls the video, audio and control-state channels the
//! browser publishes and prints what arrives. Commands flow the other way;
//! the agent writes them with `CommandWriter`.
//!
//! Run with:
//!   cargo run --example agent-loop -- 30
//!
//! The optional argument is how many seconds to run (default 10).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use shmbridge::channel::{ControlState, VideoFrame};
use shmbridge::poll::{ChannelHandler, PollConfig, PollLoop, StatusLine, Utterance};

#[derive(Default)]
struct Agent {
    frames: u64,
}

impl ChannelHandler for Agent {
    fn on_frame(&mut self, frame: &VideoFrame) {
        self.frames += 1;
        if self.frames % 30 == 1 {
            println!(
                "frame {} {}x{} ({} bytes)",
                frame.index,
                frame.width,
                frame.height,
                frame.pixels.len()
            );
        }
    }

    fn on_utterance(&mut self, utterance: Utterance) {
        println!(
            "utterance {:.2}s at {} Hz",
            utterance.duration().as_secs_f32(),
            utterance.sample_rate
        );
    }

    fn on_state(&mut self, state: ControlState) {
        println!("state {}", state.as_str());
    }

    fn on_status(&mut self, status: &StatusLine) {
        eprintln!("{status}");
    }
}

fn main() {
    let seconds = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(10);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(seconds));
            stop.store(true, Ordering::Relaxed);
        });
    }

    let mut agent = PollLoop::connect(PollConfig::agent(), Agent::default());
    let status = agent.run(&stop);
    eprintln!("stopped after {} frames: {status}", agent.handler().frames);
}
