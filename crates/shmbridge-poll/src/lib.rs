//! The consumer side of shmbridge.
//!
//! [`PollLoop`] attaches to every channel it is configured for and
//! round-robins them on one thread, handing new frames, audio, commands and
//! control-state changes to a [`ChannelHandler`]. Channels attach and
//! reattach independently, so a producer that starts late or restarts only
//! takes its own channel offline.
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use shmbridge_channel::VideoFrame;
//! use shmbridge_poll::{ChannelHandler, PollConfig, PollLoop};
//!
//! struct Frames;
//!
//! impl ChannelHandler for Frames {
//!     fn on_frame(&mut self, frame: &VideoFrame) {
//!         println!("frame {} {}x{}", frame.index, frame.width, frame.height);
//!     }
//! }
//!
//! let stop = AtomicBool::new(false);
//! PollLoop::connect(PollConfig::default(), Frames).run(&stop);
//! ```

pub mod accumulator;
pub mod connector;
pub mod error;
pub mod handler;
pub mod poll_loop;

pub use accumulator::{AccumulatorConfig, AudioAccumulator, Utterance};
pub use connector::{open_event, region_opener, AttachMode, ChannelSlot, LinkStatus, Opener};
pub use error::{PollError, Result};
pub use handler::{ChannelHandler, CommandSource, NoopHandler};
pub use poll_loop::{
    PollConfig, PollLoop, PollReport, RegionSpec, Sources, StatusLine, DEFAULT_POLL_INTERVAL,
};
