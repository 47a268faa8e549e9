use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use shmbridge_channel::{
    names, AudioConfig, AudioReader, ChannelError, CommandConfig, CommandLayout, CommandReader,
    ControlState, FrameReader, LogThrottle, StateCell, VideoConfig,
};
use shmbridge_region::{Notifier, RegionConfig, SharedMemory, SharedRegion};
use tracing::{debug, info, trace, warn};

use crate::accumulator::{AccumulatorConfig, AudioAccumulator};
use crate::connector::{open_event, region_opener, AttachMode, ChannelSlot, LinkStatus, Opener};
use crate::handler::{ChannelHandler, CommandSource};

/// Default sleep between idle passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Name and size of one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionSpec {
    pub name: String,
    pub size: usize,
}

impl RegionSpec {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Poll loop configuration.
///
/// A `None` region is not polled at all. The default is the agent side:
/// video, audio and control state, which the browser writes. The command
/// regions flow the other way and are read by the browser; see
/// [`PollConfig::browser`].
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub video: Option<RegionSpec>,
    pub audio: Option<RegionSpec>,
    /// Recognized text, text layout.
    pub text_commands: Option<RegionSpec>,
    /// Typed commands, structured layout.
    pub commands: Option<RegionSpec>,
    pub state: Option<RegionSpec>,
    /// Event woken by command writers. Only waited on when `commands` is
    /// also set; the wake is auto-reset, so a loop that does not read
    /// commands would take it from the process that does.
    pub command_event: Option<String>,
    pub attach: AttachMode,
    pub region: RegionConfig,
    pub poll_interval: Duration,
    pub reconnect_interval: Duration,
    /// How often [`ChannelHandler::on_status`] is called. `None` disables it.
    pub status_interval: Option<Duration>,
    pub video_config: VideoConfig,
    pub audio_config: AudioConfig,
    pub command_config: CommandConfig,
    pub accumulator: AccumulatorConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            video: Some(RegionSpec::new(names::VIDEO, names::VIDEO_SIZE)),
            audio: Some(RegionSpec::new(names::AUDIO, names::AUDIO_SIZE)),
            text_commands: None,
            commands: None,
            state: Some(RegionSpec::new(names::STATE, names::STATE_SIZE)),
            command_event: None,
            attach: AttachMode::default(),
            region: RegionConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_interval: Duration::from_secs(1),
            status_interval: Some(Duration::from_secs(5)),
            video_config: VideoConfig::default(),
            audio_config: AudioConfig::default(),
            command_config: CommandConfig::default(),
            accumulator: AccumulatorConfig::default(),
        }
    }
}

impl PollConfig {
    /// A config with no channels; enable them with the `with_*` methods.
    pub fn empty() -> Self {
        Self {
            video: None,
            audio: None,
            text_commands: None,
            commands: None,
            state: None,
            command_event: None,
            ..Self::default()
        }
    }

    /// The agent side: everything the browser publishes. Same as `default()`.
    pub fn agent() -> Self {
        Self::default()
    }

    /// The browser side: recognized text and typed commands written by the
    /// agent, woken by the command event.
    pub fn browser() -> Self {
        Self::empty()
            .with_text_commands(RegionSpec::new(names::INPUT_TEXT, names::INPUT_TEXT_SIZE))
            .with_commands(RegionSpec::new(names::COMMAND, names::COMMAND_SIZE))
            .with_command_event(names::COMMAND_EVENT)
    }

    pub fn with_video(mut self, spec: RegionSpec) -> Self {
        self.video = Some(spec);
        self
    }

    pub fn with_audio(mut self, spec: RegionSpec) -> Self {
        self.audio = Some(spec);
        self
    }

    pub fn with_text_commands(mut self, spec: RegionSpec) -> Self {
        self.text_commands = Some(spec);
        self
    }

    pub fn with_commands(mut self, spec: RegionSpec) -> Self {
        self.commands = Some(spec);
        self
    }

    pub fn with_state(mut self, spec: RegionSpec) -> Self {
        self.state = Some(spec);
        self
    }

    pub fn with_command_event(mut self, name: impl Into<String>) -> Self {
        self.command_event = Some(name.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Where each channel's memory comes from.
pub struct Sources<M> {
    pub video: Option<Opener<M>>,
    pub audio: Option<Opener<M>>,
    pub text_commands: Option<Opener<M>>,
    pub commands: Option<Opener<M>>,
    pub state: Option<Opener<M>>,
    pub command_event: Option<Arc<dyn Notifier>>,
}

impl<M> Default for Sources<M> {
    fn default() -> Self {
        Self {
            video: None,
            audio: None,
            text_commands: None,
            commands: None,
            state: None,
            command_event: None,
        }
    }
}

impl Sources<Arc<SharedRegion>> {
    /// Named OS regions for every channel enabled in `config`.
    pub fn named(config: &PollConfig) -> Self {
        let opener = |spec: &Option<RegionSpec>| {
            spec.as_ref().map(|spec| {
                region_opener(
                    spec.name.clone(),
                    spec.size,
                    config.attach,
                    config.region.clone(),
                )
            })
        };
        Self {
            video: opener(&config.video),
            audio: opener(&config.audio),
            text_commands: opener(&config.text_commands),
            commands: opener(&config.commands),
            state: opener(&config.state),
            command_event: config
                .command_event
                .as_deref()
                .filter(|_| config.commands.is_some())
                .and_then(|name| open_event(name, &config.region)),
        }
    }
}

/// What one pass of the loop did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub frames: u64,
    pub audio_chunks: u64,
    pub commands: u64,
    pub utterances: u64,
    pub state_changes: u64,
    /// Torn or oversized reads skipped until the next pass.
    pub dropped: u64,
    pub errors: u64,
}

impl PollReport {
    /// True when nothing new was delivered.
    pub fn is_idle(&self) -> bool {
        self.frames == 0
            && self.audio_chunks == 0
            && self.commands == 0
            && self.utterances == 0
            && self.state_changes == 0
    }

    fn add(&mut self, other: &PollReport) {
        self.frames += other.frames;
        self.audio_chunks += other.audio_chunks;
        self.commands += other.commands;
        self.utterances += other.utterances;
        self.state_changes += other.state_changes;
        self.dropped += other.dropped;
        self.errors += other.errors;
    }
}

/// Periodic summary of the loop.
#[derive(Debug, Clone, Serialize)]
pub struct StatusLine {
    pub uptime_ms: u64,
    pub links: BTreeMap<&'static str, LinkStatus>,
    pub last_frame_index: u64,
    pub control_state: Option<&'static str>,
    pub capturing: bool,
    pub frames: u64,
    pub audio_chunks: u64,
    pub commands: u64,
    pub utterances: u64,
    pub dropped: u64,
    pub errors: u64,
}

impl StatusLine {
    pub fn all_connected(&self) -> bool {
        self.links.values().all(|s| *s == LinkStatus::Connected)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, status) in &self.links {
            write!(f, "{label}={} ", status.as_str())?;
        }
        write!(
            f,
            "frames={} last_frame={} audio={} commands={} utterances={} dropped={} errors={}",
            self.frames,
            self.last_frame_index,
            self.audio_chunks,
            self.commands,
            self.utterances,
            self.dropped,
            self.errors
        )?;
        if let Some(state) = self.control_state {
            write!(f, " state={state}")?;
        }
        Ok(())
    }
}

struct CommandCursor<M> {
    reader: CommandReader<M>,
    last_seen: u64,
}

/// Round-robins every attached channel on one thread.
///
/// Each pass reads the control state, then video, audio and both command
/// regions, handing anything new to the [`ChannelHandler`]. Channels attach
/// lazily and independently: a missing region leaves its slot disconnected
/// and is retried every `reconnect_interval` while the others keep flowing.
/// Torn and oversized reads are dropped and picked up again on a later pass.
pub struct PollLoop<H, M = Arc<SharedRegion>> {
    config: PollConfig,
    handler: H,
    video: Option<ChannelSlot<FrameReader<M>>>,
    audio: Option<ChannelSlot<AudioReader<M>>>,
    text_commands: Option<ChannelSlot<CommandCursor<M>>>,
    commands: Option<ChannelSlot<CommandCursor<M>>>,
    state: Option<ChannelSlot<StateCell<M>>>,
    event: Option<Arc<dyn Notifier>>,
    accumulator: AudioAccumulator,
    control_state: Option<ControlState>,
    last_frame_index: u64,
    totals: PollReport,
    errors: LogThrottle,
    started: Instant,
    last_status: Instant,
}

impl<H: ChannelHandler> PollLoop<H> {
    /// Attach to the named regions in `config`.
    pub fn connect(config: PollConfig, handler: H) -> Self {
        let sources = Sources::named(&config);
        Self::with_sources(config, sources, handler)
    }
}

impl<H, M> PollLoop<H, M>
where
    H: ChannelHandler,
    M: SharedMemory + Send + 'static,
{
    pub fn with_sources(config: PollConfig, sources: Sources<M>, handler: H) -> Self {
        let retry = config.reconnect_interval;

        let video = sources.video.map(|mut open| {
            let video_config = config.video_config.clone();
            let open: Opener<FrameReader<M>> =
                Box::new(move || Ok(FrameReader::with_config(open()?, video_config.clone())));
            ChannelSlot::new("video", retry, open)
        });
        let audio = sources.audio.map(|mut open| {
            let audio_config = config.audio_config.clone();
            let open: Opener<AudioReader<M>> =
                Box::new(move || Ok(AudioReader::with_config(open()?, audio_config.clone())));
            ChannelSlot::new("audio", retry, open)
        });
        let text_commands = sources.text_commands.map(|open| {
            command_slot(
                "text-commands",
                retry,
                open,
                CommandLayout::Text,
                config.command_config.clone(),
            )
        });
        let commands = sources.commands.map(|open| {
            command_slot(
                "commands",
                retry,
                open,
                CommandLayout::Structured,
                config.command_config.clone(),
            )
        });
        let state = sources.state.map(|mut open| {
            let open: Opener<StateCell<M>> = Box::new(move || Ok(StateCell::new(open()?)));
            ChannelSlot::new("state", retry, open)
        });

        let event = match sources.command_event {
            Some(_) if commands.is_none() => {
                debug!("no command region to read; leaving the command event to other readers");
                None
            }
            event => event,
        };

        let now = Instant::now();
        Self {
            accumulator: AudioAccumulator::new(config.accumulator.clone()),
            config,
            handler,
            video,
            audio,
            text_commands,
            commands,
            state,
            event,
            control_state: None,
            last_frame_index: 0,
            totals: PollReport::default(),
            errors: LogThrottle::default(),
            started: now,
            last_status: now,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Counters accumulated since the loop was built.
    pub fn totals(&self) -> PollReport {
        self.totals
    }

    /// Poll every channel once without sleeping.
    pub fn run_once(&mut self) -> PollReport {
        let now = Instant::now();
        let mut report = PollReport::default();

        self.poll_state(now, &mut report);
        self.poll_video(now, &mut report);
        self.poll_audio(now, &mut report);
        if let Some(slot) = self.text_commands.as_mut() {
            poll_commands(
                slot,
                CommandSource::Text,
                &mut self.handler,
                &self.errors,
                now,
                &mut report,
            );
        }
        if let Some(slot) = self.commands.as_mut() {
            poll_commands(
                slot,
                CommandSource::Structured,
                &mut self.handler,
                &self.errors,
                now,
                &mut report,
            );
        }

        if let Some(utterance) = self.accumulator.poll(now) {
            report.utterances += 1;
            self.handler.on_utterance(utterance);
        }

        self.totals.add(&report);
        self.maybe_report_status(now);
        report
    }

    /// Poll until `stop` is set, resting between idle passes.
    ///
    /// An idle pass waits on the command event for up to `poll_interval`
    /// when one is attached, and sleeps otherwise.
    pub fn run(&mut self, stop: &AtomicBool) -> StatusLine {
        info!(
            poll_interval_us = self.config.poll_interval.as_micros() as u64,
            event = self.event.is_some(),
            "poll loop started"
        );
        while !stop.load(Ordering::Relaxed) {
            if self.run_once().is_idle() {
                self.rest();
            }
        }
        let status = self.status();
        info!(%status, "poll loop stopped");
        status
    }

    /// Poll until `cancel` fires, sleeping on the tokio timer between idle
    /// passes.
    ///
    /// Passes run inline on the calling task. The command event is not
    /// waited on here.
    #[cfg(feature = "async")]
    pub async fn run_async(&mut self, cancel: tokio_util::sync::CancellationToken) -> StatusLine {
        info!(
            poll_interval_us = self.config.poll_interval.as_micros() as u64,
            "async poll loop started"
        );
        while !cancel.is_cancelled() {
            if !self.run_once().is_idle() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        let status = self.status();
        info!(%status, "async poll loop stopped");
        status
    }

    /// Current link state and counters.
    pub fn status(&self) -> StatusLine {
        let mut links = BTreeMap::new();
        if let Some(slot) = &self.video {
            links.insert(slot.label(), slot.status());
        }
        if let Some(slot) = &self.audio {
            links.insert(slot.label(), slot.status());
        }
        if let Some(slot) = &self.text_commands {
            links.insert(slot.label(), slot.status());
        }
        if let Some(slot) = &self.commands {
            links.insert(slot.label(), slot.status());
        }
        if let Some(slot) = &self.state {
            links.insert(slot.label(), slot.status());
        }

        StatusLine {
            uptime_ms: self.started.elapsed().as_millis() as u64,
            links,
            last_frame_index: self.last_frame_index,
            control_state: self.control_state.map(ControlState::as_str),
            capturing: self.accumulator.is_capturing(),
            frames: self.totals.frames,
            audio_chunks: self.totals.audio_chunks,
            commands: self.totals.commands,
            utterances: self.totals.utterances,
            dropped: self.totals.dropped,
            errors: self.totals.errors,
        }
    }

    fn poll_state(&mut self, now: Instant, report: &mut PollReport) {
        let Some(slot) = self.state.as_mut() else {
            return;
        };
        let result = match slot.get(now) {
            Some(cell) => cell.read(),
            None => return,
        };
        match result {
            Ok(state) if Some(state) != self.control_state => {
                debug!(state = state.as_str(), "control state changed");
                self.control_state = Some(state);
                self.accumulator
                    .set_listening(state == ControlState::Listening, now);
                report.state_changes += 1;
                self.handler.on_state(state);
            }
            Ok(_) => {}
            Err(err) => channel_failed(slot, err, &self.errors, now, report),
        }
    }

    fn poll_video(&mut self, now: Instant, report: &mut PollReport) {
        let Some(slot) = self.video.as_mut() else {
            return;
        };
        let result = match slot.get(now) {
            Some(reader) => reader.poll_latest(),
            None => return,
        };
        match result {
            Ok(Some(frame)) => {
                trace!(index = frame.index, "frame");
                self.last_frame_index = frame.index;
                report.frames += 1;
                self.handler.on_frame(&frame);
            }
            Ok(None) => {}
            Err(err) => channel_failed(slot, err, &self.errors, now, report),
        }
    }

    fn poll_audio(&mut self, now: Instant, report: &mut PollReport) {
        let Some(slot) = self.audio.as_mut() else {
            return;
        };
        let result = match slot.get(now) {
            Some(reader) => reader.poll_new(),
            None => return,
        };
        match result {
            Ok(Some(chunk)) => {
                report.audio_chunks += 1;
                self.handler.on_audio(&chunk);
                if let Err(err) = self.accumulator.push(&chunk) {
                    report.errors += 1;
                    if let Some(occurrences) = self.errors.hit() {
                        warn!(error = %err, occurrences, "audio chunk not accumulated");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => channel_failed(slot, err, &self.errors, now, report),
        }
    }

    fn rest(&self) {
        match &self.event {
            Some(event) => {
                if let Err(err) = event.wait_timeout(self.config.poll_interval) {
                    trace!(error = %err, "event wait failed");
                    std::thread::sleep(self.config.poll_interval);
                }
            }
            None => std::thread::sleep(self.config.poll_interval),
        }
    }

    fn maybe_report_status(&mut self, now: Instant) {
        let Some(interval) = self.config.status_interval else {
            return;
        };
        if now.duration_since(self.last_status) < interval {
            return;
        }
        self.last_status = now;
        let status = self.status();
        debug!(%status, "status");
        self.handler.on_status(&status);
    }
}

fn command_slot<M>(
    label: &'static str,
    retry: Duration,
    mut open: Opener<M>,
    layout: CommandLayout,
    config: CommandConfig,
) -> ChannelSlot<CommandCursor<M>>
where
    M: SharedMemory + Send + 'static,
{
    let open: Opener<CommandCursor<M>> = Box::new(move || {
        let reader = CommandReader::with_config(open()?, layout, config.clone());
        // Commands written before this attach are not replayed.
        let last_seen = reader.current_revision().unwrap_or(0);
        Ok(CommandCursor { reader, last_seen })
    });
    ChannelSlot::new(label, retry, open)
}

fn poll_commands<M: SharedMemory, H: ChannelHandler>(
    slot: &mut ChannelSlot<CommandCursor<M>>,
    source: CommandSource,
    handler: &mut H,
    errors: &LogThrottle,
    now: Instant,
    report: &mut PollReport,
) {
    let result = match slot.get(now) {
        Some(cursor) => match cursor.reader.read_if_newer(cursor.last_seen) {
            Ok(Some(command)) => {
                cursor.last_seen = command.revision;
                Ok(Some(command))
            }
            other => other,
        },
        None => return,
    };
    match result {
        Ok(Some(command)) => {
            debug!(
                source = source.as_str(),
                kind = command.kind.as_str(),
                revision = command.revision,
                len = command.payload.len(),
                "command received"
            );
            report.commands += 1;
            handler.on_command(source, &command);
        }
        Ok(None) => {}
        Err(err) => channel_failed(slot, err, errors, now, report),
    }
}

fn channel_failed<T>(
    slot: &mut ChannelSlot<T>,
    err: ChannelError,
    errors: &LogThrottle,
    now: Instant,
    report: &mut PollReport,
) {
    if err.is_transient() {
        trace!(channel = slot.label(), error = %err, "read dropped");
        report.dropped += 1;
        return;
    }
    report.errors += 1;
    if let ChannelError::Region(region_err) = &err {
        warn!(channel = slot.label(), error = %region_err, "region failed; reattaching");
        slot.disconnect(now);
    } else if let Some(occurrences) = errors.hit() {
        warn!(channel = slot.label(), error = %err, occurrences, "channel read failed");
    }
}
