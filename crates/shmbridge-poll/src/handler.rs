use shmbridge_channel::{AudioChunk, Command, ControlState, VideoFrame};

use crate::accumulator::Utterance;
use crate::poll_loop::StatusLine;

/// Which command region a command was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Recognized text (text layout).
    Text,
    /// Typed commands (structured layout).
    Structured,
}

impl CommandSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandSource::Text => "text",
            CommandSource::Structured => "structured",
        }
    }
}

/// Hooks the poll loop calls with new data.
///
/// Every method has a no-op default, so a consumer implements only the
/// channels it cares about: an image decoder takes frames, a speech engine
/// takes utterances, a dispatcher takes commands. Hooks run on the polling
/// thread and should return quickly.
pub trait ChannelHandler {
    fn on_frame(&mut self, _frame: &VideoFrame) {}

    /// Every new audio chunk, whether or not push-to-talk is active.
    fn on_audio(&mut self, _chunk: &AudioChunk) {}

    /// Audio captured during one push-to-talk press, ready for recognition.
    fn on_utterance(&mut self, _utterance: Utterance) {}

    fn on_command(&mut self, _source: CommandSource, _command: &Command) {}

    /// The control state changed.
    fn on_state(&mut self, _state: ControlState) {}

    /// Periodic status line.
    fn on_status(&mut self, _status: &StatusLine) {}
}

impl<T: ChannelHandler + ?Sized> ChannelHandler for &mut T {
    fn on_frame(&mut self, frame: &VideoFrame) {
        (**self).on_frame(frame)
    }

    fn on_audio(&mut self, chunk: &AudioChunk) {
        (**self).on_audio(chunk)
    }

    fn on_utterance(&mut self, utterance: Utterance) {
        (**self).on_utterance(utterance)
    }

    fn on_command(&mut self, source: CommandSource, command: &Command) {
        (**self).on_command(source, command)
    }

    fn on_state(&mut self, state: ControlState) {
        (**self).on_state(state)
    }

    fn on_status(&mut self, status: &StatusLine) {
        (**self).on_status(status)
    }
}

impl<T: ChannelHandler + ?Sized> ChannelHandler for Box<T> {
    fn on_frame(&mut self, frame: &VideoFrame) {
        (**self).on_frame(frame)
    }

    fn on_audio(&mut self, chunk: &AudioChunk) {
        (**self).on_audio(chunk)
    }

    fn on_utterance(&mut self, utterance: Utterance) {
        (**self).on_utterance(utterance)
    }

    fn on_command(&mut self, source: CommandSource, command: &Command) {
        (**self).on_command(source, command)
    }

    fn on_state(&mut self, state: ControlState) {
        (**self).on_state(state)
    }

    fn on_status(&mut self, status: &StatusLine) {
        (**self).on_status(status)
    }
}

/// A handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ChannelHandler for NoopHandler {}
