use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use shmbridge_region::{Notifier, SharedMemory};
use tracing::{debug, trace, warn};

use crate::clock::unix_millis;
use crate::codec::{
    CommandHeader, CommandType, TextHeader, WireHeader, COMMAND_HEADER_SIZE, COMMAND_VERSION,
    TEXT_HEADER_SIZE,
};
use crate::error::{ChannelError, Result};
use crate::payload::CommandPayload;
use crate::throttle::{LogThrottle, DEFAULT_LOG_EVERY};

/// Wire layout of a command region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandLayout {
    /// `revision: u32, length: u32` then UTF-8 text.
    Text,
    /// Magic-tagged typed header, revision carried in `timestamp_ms`.
    Structured,
}

impl CommandLayout {
    pub fn header_size(self) -> usize {
        match self {
            CommandLayout::Text => TEXT_HEADER_SIZE,
            CommandLayout::Structured => COMMAND_HEADER_SIZE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandLayout::Text => "text",
            CommandLayout::Structured => "structured",
        }
    }
}

/// What a command carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Plain UTF-8 text (text layout only).
    Text,
    /// A typed command (structured layout only).
    Structured(CommandType),
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Text => "text",
            CommandKind::Structured(command_type) => command_type.as_str(),
        }
    }
}

/// Configuration for a command reader.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Sleep between polls in `wait_for_newer` when no event is attached.
    pub poll_interval: Duration,
    /// Longest single event wait before re-polling the region, so a missed
    /// signal only delays delivery by this much.
    pub event_wait_slice: Duration,
    /// Log repeated size-check failures on the first and then every Nth hit.
    pub size_log_every: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            event_wait_slice: Duration::from_millis(100),
            size_log_every: DEFAULT_LOG_EVERY,
        }
    }
}

/// A command copied out of the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub revision: u64,
    pub payload: Bytes,
}

impl Command {
    /// The payload as UTF-8 text.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload)
            .map_err(|err| ChannelError::InvalidPayload(format!("command text: {err}")))
    }

    /// Decode a structured payload.
    pub fn decode_payload(&self) -> Result<CommandPayload> {
        match self.kind {
            CommandKind::Structured(command_type) => {
                CommandPayload::decode(command_type, &self.payload)
            }
            CommandKind::Text => Err(ChannelError::UnsupportedKind {
                layout: "text",
                kind: "typed payload".to_string(),
            }),
        }
    }
}

/// Header fields that identify one published command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    revision: u64,
    length: usize,
    kind: CommandKind,
}

fn read_slot<M: SharedMemory>(mem: &M, layout: CommandLayout) -> Result<Option<Slot>> {
    let raw = mem.read_vec(0, layout.header_size())?;
    match layout {
        CommandLayout::Text => {
            let header = TextHeader::decode(&raw)?;
            if header.revision == 0 {
                return Ok(None);
            }
            Ok(Some(Slot {
                revision: u64::from(header.revision),
                length: header.length as usize,
                kind: CommandKind::Text,
            }))
        }
        CommandLayout::Structured => match CommandHeader::decode(&raw) {
            Ok(header) => Ok(Some(Slot {
                revision: header.timestamp_ms,
                length: header.data_size as usize,
                kind: CommandKind::Structured(header.command_type),
            })),
            Err(err) => {
                if !err.is_uninitialized() {
                    trace!(error = %err, "ignoring command slot");
                }
                Ok(None)
            }
        },
    }
}

/// Whether `revision` follows `last_seen` on this layout.
///
/// Text revisions are a wrapping u32 that skips 0: a revision is newer when
/// it lies less than half the counter space ahead. `last_seen` 0 means
/// nothing was seen yet.
fn is_newer(layout: CommandLayout, revision: u64, last_seen: u64) -> bool {
    match layout {
        CommandLayout::Text if last_seen != 0 => {
            let ahead = (revision as u32).wrapping_sub(last_seen as u32);
            ahead != 0 && ahead < 1 << 31
        }
        _ => revision > last_seen,
    }
}

/// Writes commands into a single-slot region and wakes the reader.
///
/// The payload is written first and the header carrying the new revision
/// last, so a reader that sees the revision also sees the payload.
pub struct CommandWriter<M> {
    mem: M,
    layout: CommandLayout,
    notifier: Option<Arc<dyn Notifier>>,
}

impl<M: SharedMemory> CommandWriter<M> {
    pub fn new(mem: M, layout: CommandLayout) -> Self {
        Self {
            mem,
            layout,
            notifier: None,
        }
    }

    /// Signal `notifier` after every write.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Publish a command and signal the reader. Returns the new revision.
    pub fn write_command(&mut self, kind: CommandKind, payload: &[u8]) -> Result<u64> {
        let command_type = match (self.layout, kind) {
            (CommandLayout::Text, CommandKind::Text) => None,
            (CommandLayout::Structured, CommandKind::Structured(command_type)) => {
                Some(command_type)
            }
            _ => {
                return Err(ChannelError::UnsupportedKind {
                    layout: self.layout.as_str(),
                    kind: kind.as_str().to_string(),
                })
            }
        };

        let max = self.max_payload();
        let length = u32::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= max)
            .ok_or(ChannelError::PayloadTooLarge {
                size: payload.len(),
                max,
            })?;

        let header_size = self.layout.header_size();
        let current = read_slot(&self.mem, self.layout)?.map_or(0, |slot| slot.revision);

        let (revision, header) = match command_type {
            None => {
                let revision = u32::try_from(current).unwrap_or(0).wrapping_add(1).max(1);
                let header = TextHeader { revision, length };
                (u64::from(revision), header.to_vec())
            }
            Some(command_type) => {
                let revision = unix_millis().max(current.saturating_add(1));
                let header = CommandHeader {
                    version: COMMAND_VERSION,
                    command_type,
                    data_size: length,
                    timestamp_ms: revision,
                };
                (revision, header.to_vec())
            }
        };

        self.mem.write_at(header_size, payload)?;
        fence(Ordering::Release);
        self.mem.write_at(0, &header)?;
        debug!(
            layout = self.layout.as_str(),
            kind = kind.as_str(),
            revision,
            bytes = payload.len(),
            "wrote command"
        );

        self.signal();
        Ok(revision)
    }

    /// Publish UTF-8 text on a text-layout region.
    pub fn write_text(&mut self, text: &str) -> Result<u64> {
        self.write_command(CommandKind::Text, text.as_bytes())
    }

    /// Encode and publish a typed payload on a structured-layout region.
    pub fn write_payload(&mut self, payload: &CommandPayload) -> Result<u64> {
        let bytes = payload.encode()?;
        self.write_command(CommandKind::Structured(payload.command_type()), &bytes)
    }

    /// Wake the reader. Advisory: a failure is logged and otherwise ignored,
    /// since the reader also polls.
    pub fn signal(&self) {
        if let Some(notifier) = &self.notifier {
            if let Err(err) = notifier.notify() {
                warn!(error = %err, "command event signal failed");
            }
        }
    }

    /// Largest payload the region can hold.
    pub fn max_payload(&self) -> usize {
        self.mem.capacity().saturating_sub(self.layout.header_size())
    }

    pub fn layout(&self) -> CommandLayout {
        self.layout
    }

    pub fn get_ref(&self) -> &M {
        &self.mem
    }
}

/// Reads commands newer than a caller-held revision.
pub struct CommandReader<M> {
    mem: M,
    layout: CommandLayout,
    notifier: Option<Arc<dyn Notifier>>,
    config: CommandConfig,
    size_failures: LogThrottle,
}

impl<M: SharedMemory> CommandReader<M> {
    pub fn new(mem: M, layout: CommandLayout) -> Self {
        Self::with_config(mem, layout, CommandConfig::default())
    }

    pub fn with_config(mem: M, layout: CommandLayout, config: CommandConfig) -> Self {
        Self {
            mem,
            layout,
            notifier: None,
            size_failures: LogThrottle::new(config.size_log_every),
            config,
        }
    }

    /// Wait on `notifier` in [`wait_for_newer`](Self::wait_for_newer).
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Revision currently in the slot, 0 when nothing was written.
    pub fn current_revision(&self) -> Result<u64> {
        Ok(read_slot(&self.mem, self.layout)?.map_or(0, |slot| slot.revision))
    }

    /// Return the command in the slot if its revision is newer than
    /// `last_seen`.
    ///
    /// Text revisions are compared with wrapping serial arithmetic, so the
    /// writer's step from `u32::MAX` to 1 still counts as newer.
    pub fn read_if_newer(&self, last_seen: u64) -> Result<Option<Command>> {
        let slot = match read_slot(&self.mem, self.layout)? {
            Some(slot) if is_newer(self.layout, slot.revision, last_seen) => slot,
            _ => return Ok(None),
        };

        let header_size = self.layout.header_size();
        let available = self.mem.capacity().saturating_sub(header_size);
        if slot.length > available {
            if let Some(occurrences) = self.size_failures.hit() {
                warn!(
                    layout = self.layout.as_str(),
                    declared = slot.length,
                    available,
                    occurrences,
                    "command size exceeds region capacity"
                );
            }
            return Err(ChannelError::SizeOutOfBounds {
                declared: slot.length,
                available,
            });
        }

        let payload = self.mem.read_vec(header_size, slot.length)?;
        fence(Ordering::Acquire);

        if read_slot(&self.mem, self.layout)? != Some(slot) {
            return Err(ChannelError::TornRead { channel: "command" });
        }

        Ok(Some(Command {
            kind: slot.kind,
            revision: slot.revision,
            payload: Bytes::from(payload),
        }))
    }

    /// Block until a command newer than `last_seen` appears or `timeout`
    /// elapses.
    ///
    /// Waits on the attached event when there is one and polls otherwise.
    /// The region is re-checked after every wake, timeout or event error.
    pub fn wait_for_newer(&self, last_seen: u64, timeout: Duration) -> Result<Option<Command>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.read_if_newer(last_seen) {
                Ok(Some(command)) => return Ok(Some(command)),
                Ok(None) => {}
                Err(err) if err.is_transient() => trace!(error = %err, "retrying command read"),
                Err(err) => return Err(err),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline - now;

            match &self.notifier {
                Some(notifier) => {
                    let slice = remaining.min(self.config.event_wait_slice);
                    if let Err(err) = notifier.wait_timeout(slice) {
                        debug!(error = %err, "command event wait failed; polling");
                        std::thread::sleep(self.config.poll_interval.min(remaining));
                    }
                }
                None => std::thread::sleep(self.config.poll_interval.min(remaining)),
            }
        }
    }

    pub fn layout(&self) -> CommandLayout {
        self.layout
    }

    pub fn get_ref(&self) -> &M {
        &self.mem
    }
}
