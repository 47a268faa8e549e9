//! Single-slot channels over named shared memory.
//!
//! Every channel is one region holding a fixed little-endian header at
//! offset 0 followed immediately by the payload. Writers overwrite the slot;
//! readers copy out whatever is newest and re-check the header afterwards to
//! catch a concurrent overwrite:
//! - video frames (monotonic frame index)
//! - audio chunks (monotonic timestamp with restart detection)
//! - commands (revision counter, text or structured layout)
//!
//! There is no locking and no queue. A reader that polls too slowly misses
//! intermediate values.

mod clock;

pub mod audio;
pub mod codec;
pub mod command;
pub mod error;
pub mod names;
pub mod payload;
pub mod state;
pub mod throttle;
pub mod video;

pub use audio::{AudioChunk, AudioConfig, AudioReader, AudioWriter};
pub use codec::{
    AudioHeader, CommandHeader, CommandType, PixelFormat, SampleFormat, TextHeader, VideoHeader,
    WireHeader, AUDIO_HEADER_SIZE, COMMAND_HEADER_SIZE, TEXT_HEADER_SIZE, VIDEO_HEADER_SIZE,
};
pub use command::{
    Command, CommandConfig, CommandKind, CommandLayout, CommandReader, CommandWriter,
};
pub use error::{ChannelError, DecodeError, Result};
pub use payload::{ActionRequest, AgentMode, CommandPayload};
pub use state::{ControlState, StateCell};
pub use throttle::LogThrottle;
pub use video::{FrameReader, FrameWriter, VideoConfig, VideoFrame};
