use std::time::{Duration, Instant};

use shmbridge_channel::{AudioChunk, ChannelError};
use tracing::{debug, info};

/// Push-to-talk capture timing.
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Audio kept after the button is released.
    pub tail: Duration,
    /// Shortest capture handed off, measured from the press.
    pub min_duration: Duration,
    /// Oldest audio is dropped beyond this length.
    pub max_buffered: Duration,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            tail: Duration::from_secs(1),
            min_duration: Duration::from_secs(2),
            max_buffered: Duration::from_secs(30),
        }
    }
}

/// Audio captured during one press, as interleaved 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub sample_rate: u32,
    pub channels: u32,
    pub samples: Vec<i16>,
}

impl Utterance {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.frames() as u64 * 1_000_000_000 / u64::from(self.sample_rate))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Recording { started: Instant },
    Tail { started: Instant, released: Instant },
}

/// Collects audio between a push-to-talk press and its release.
///
/// Recording starts when listening turns on. After it turns off, audio is
/// still collected for `tail`, and the capture is only finished once it is
/// at least `min_duration` long. A press during the tail continues the same
/// capture.
#[derive(Debug)]
pub struct AudioAccumulator {
    config: AccumulatorConfig,
    phase: Phase,
    sample_rate: u32,
    channels: u32,
    samples: Vec<i16>,
}

impl AudioAccumulator {
    pub fn new(config: AccumulatorConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            sample_rate: 0,
            channels: 0,
            samples: Vec::new(),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Track the push-to-talk state.
    pub fn set_listening(&mut self, listening: bool, now: Instant) {
        self.phase = match (self.phase, listening) {
            (Phase::Idle, true) => {
                info!("push-to-talk pressed; capturing audio");
                self.samples.clear();
                Phase::Recording { started: now }
            }
            (Phase::Tail { started, .. }, true) => Phase::Recording { started },
            (Phase::Recording { started }, false) => {
                debug!("push-to-talk released; capturing tail");
                Phase::Tail {
                    started,
                    released: now,
                }
            }
            (phase, _) => phase,
        };
    }

    /// Append a chunk while capturing. Chunks outside a capture are ignored.
    pub fn push(&mut self, chunk: &AudioChunk) -> Result<(), ChannelError> {
        if !self.is_capturing() {
            return Ok(());
        }
        if self.sample_rate != chunk.sample_rate || self.channels != chunk.channels {
            if !self.samples.is_empty() {
                debug!(
                    from = self.sample_rate,
                    to = chunk.sample_rate,
                    "audio format changed mid-capture; restarting buffer"
                );
            }
            self.samples.clear();
            self.sample_rate = chunk.sample_rate;
            self.channels = chunk.channels;
        }

        self.samples.extend(chunk.to_pcm16()?);

        let max = self.max_samples();
        if self.samples.len() > max {
            let excess = self.samples.len() - max;
            self.samples.drain(..excess);
        }
        Ok(())
    }

    /// Finish the capture once the tail and minimum duration have passed.
    pub fn poll(&mut self, now: Instant) -> Option<Utterance> {
        let Phase::Tail { started, released } = self.phase else {
            return None;
        };
        if now.duration_since(released) < self.config.tail
            || now.duration_since(started) < self.config.min_duration
        {
            return None;
        }

        self.phase = Phase::Idle;
        let utterance = Utterance {
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples: std::mem::take(&mut self.samples),
        };
        info!(
            frames = utterance.frames(),
            duration_ms = utterance.duration().as_millis() as u64,
            "utterance captured"
        );
        Some(utterance)
    }

    fn max_samples(&self) -> usize {
        let per_second = u64::from(self.sample_rate) * u64::from(self.channels.max(1));
        let max = per_second.saturating_mul(self.config.max_buffered.as_millis() as u64) / 1000;
        usize::try_from(max).unwrap_or(usize::MAX)
    }
}

impl Default for AudioAccumulator {
    fn default() -> Self {
        Self::new(AccumulatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use shmbridge_channel::SampleFormat;

    use super::*;

    fn chunk(rate: u32, values: &[i16]) -> AudioChunk {
        AudioChunk {
            sample_rate: rate,
            channels: 1,
            frames: values.len() as u32,
            format: SampleFormat::PcmI16,
            timestamp_us: 0,
            sequence: 0,
            samples: Bytes::from(
                values
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect::<Vec<u8>>(),
            ),
        }
    }

    fn config() -> AccumulatorConfig {
        AccumulatorConfig {
            tail: Duration::from_millis(100),
            min_duration: Duration::from_millis(300),
            max_buffered: Duration::from_secs(1),
        }
    }

    #[test]
    fn ignores_audio_while_idle() {
        let mut acc = AudioAccumulator::new(config());
        acc.push(&chunk(16_000, &[1, 2, 3])).unwrap();
        assert!(!acc.is_capturing());
        assert!(acc.poll(Instant::now()).is_none());
    }

    #[test]
    fn hands_off_after_tail_and_minimum() {
        let mut acc = AudioAccumulator::new(config());
        let t0 = Instant::now();

        acc.set_listening(true, t0);
        acc.push(&chunk(16_000, &[1, 2])).unwrap();
        acc.set_listening(false, t0 + Duration::from_millis(50));
        acc.push(&chunk(16_000, &[3])).unwrap();

        assert!(acc.poll(t0 + Duration::from_millis(160)).is_none());
        assert!(acc.poll(t0 + Duration::from_millis(299)).is_none());

        let utterance = acc.poll(t0 + Duration::from_millis(300)).expect("capture done");
        assert_eq!(utterance.samples, vec![1, 2, 3]);
        assert_eq!(utterance.sample_rate, 16_000);
        assert!(!acc.is_capturing());
        assert!(acc.poll(t0 + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn press_during_tail_continues_capture() {
        let mut acc = AudioAccumulator::new(config());
        let t0 = Instant::now();

        acc.set_listening(true, t0);
        acc.push(&chunk(16_000, &[1])).unwrap();
        acc.set_listening(false, t0 + Duration::from_millis(400));
        acc.set_listening(true, t0 + Duration::from_millis(450));
        acc.push(&chunk(16_000, &[2])).unwrap();

        assert!(acc.poll(t0 + Duration::from_secs(1)).is_none());
        acc.set_listening(false, t0 + Duration::from_secs(1));
        let utterance = acc.poll(t0 + Duration::from_millis(1100)).unwrap();
        assert_eq!(utterance.samples, vec![1, 2]);
    }

    #[test]
    fn buffer_is_capped() {
        let mut acc = AudioAccumulator::new(config());
        acc.set_listening(true, Instant::now());
        for i in 0..30 {
            acc.push(&chunk(100, &[i; 10])).unwrap();
        }
        let t = Instant::now();
        acc.set_listening(false, t);
        let utterance = acc.poll(t + Duration::from_secs(1)).unwrap();
        assert_eq!(utterance.samples.len(), 100);
        assert_eq!(utterance.samples[0], 20);
        assert_eq!(utterance.duration(), Duration::from_secs(1));
    }

    #[test]
    fn format_change_restarts_buffer() {
        let mut acc = AudioAccumulator::new(config());
        let t0 = Instant::now();
        acc.set_listening(true, t0);
        acc.push(&chunk(16_000, &[1, 1])).unwrap();
        acc.push(&chunk(48_000, &[2])).unwrap();
        acc.set_listening(false, t0);
        let utterance = acc.poll(t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(utterance.sample_rate, 48_000);
        assert_eq!(utterance.samples, vec![2]);
    }
}
