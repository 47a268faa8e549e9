use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use bytes::Bytes;
use shmbridge_region::SharedMemory;
use tracing::{debug, info, trace, warn};

use crate::clock::unix_micros;
use crate::codec::{AudioHeader, SampleFormat, WireHeader, AUDIO_HEADER_SIZE};
use crate::error::{ChannelError, Result};
use crate::throttle::{LogThrottle, DEFAULT_LOG_EVERY};

/// Configuration for an audio reader.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// A timestamp regression larger than this is treated as a producer
    /// restart rather than a stale slot.
    pub reset_tolerance: Duration,
    /// Log repeated size-check failures on the first and then every Nth hit.
    pub size_log_every: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            reset_tolerance: Duration::from_millis(500),
            size_log_every: DEFAULT_LOG_EVERY,
        }
    }
}

/// One chunk of interleaved samples copied out of the slot.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u32,
    pub frames: u32,
    pub format: SampleFormat,
    pub timestamp_us: i64,
    pub sequence: u32,
    pub samples: Bytes,
}

impl AudioChunk {
    /// Samples as signed 16-bit PCM, converting from float if needed.
    pub fn to_pcm16(&self) -> Result<Vec<i16>> {
        match self.format {
            SampleFormat::PcmI16 => Ok(self
                .samples
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect()),
            SampleFormat::F32 => Ok(self
                .samples
                .chunks_exact(4)
                .map(|b| {
                    let sample = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
                })
                .collect()),
            SampleFormat::Other(raw) => Err(ChannelError::InvalidPayload(format!(
                "unknown sample format {raw}"
            ))),
        }
    }

    /// Playback length of the chunk.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(u64::from(self.frames) * 1_000_000_000 / u64::from(self.sample_rate))
    }
}

/// Publishes audio chunks into a single-slot region.
///
/// Samples are written before the header so that a reader which sees the new
/// header also sees the samples it describes.
pub struct AudioWriter<M> {
    mem: M,
    last_timestamp: i64,
    sequence: u32,
}

impl<M: SharedMemory> AudioWriter<M> {
    /// Attach a writer, continuing the timestamp and sequence in the region.
    pub fn new(mem: M) -> Result<Self> {
        let raw = mem.read_vec(0, AUDIO_HEADER_SIZE)?;
        let (last_timestamp, sequence) = match AudioHeader::decode(&raw) {
            Ok(header) => {
                debug!(sequence = header.sequence, "resuming audio slot");
                (header.timestamp_us, header.sequence)
            }
            Err(_) => (0, 0),
        };
        Ok(Self {
            mem,
            last_timestamp,
            sequence,
        })
    }

    /// Publish a chunk stamped with the current wall clock.
    ///
    /// Timestamps are kept strictly increasing even if the clock stalls.
    /// Returns the timestamp written.
    pub fn publish(
        &mut self,
        sample_rate: u32,
        channels: u32,
        frames: u32,
        format: SampleFormat,
        samples: &[u8],
    ) -> Result<i64> {
        let timestamp_us = unix_micros().max(self.last_timestamp.saturating_add(1));
        self.publish_with_timestamp(sample_rate, channels, frames, format, samples, timestamp_us)
    }

    /// Publish a chunk with an explicit timestamp, which may go backwards.
    pub fn publish_with_timestamp(
        &mut self,
        sample_rate: u32,
        channels: u32,
        frames: u32,
        format: SampleFormat,
        samples: &[u8],
        timestamp_us: i64,
    ) -> Result<i64> {
        let max = self.max_payload();
        if samples.len() > max {
            return Err(ChannelError::PayloadTooLarge {
                size: samples.len(),
                max,
            });
        }

        let sequence = self.sequence.wrapping_add(1);
        let header = AudioHeader {
            sample_rate,
            channels,
            frames,
            timestamp_us,
            format,
            sequence,
        };
        match header.payload_len() {
            Some(expected) if expected == samples.len() => {}
            Some(expected) => {
                return Err(ChannelError::InvalidPayload(format!(
                    "expected {expected} sample bytes for {frames} frames x {channels} channels, got {}",
                    samples.len()
                )))
            }
            None => {
                return Err(ChannelError::InvalidPayload(format!(
                    "unknown sample format {}",
                    format.to_wire()
                )))
            }
        }

        self.mem.write_at(AUDIO_HEADER_SIZE, samples)?;
        fence(Ordering::Release);
        self.mem.write_at(0, &header.encode())?;

        self.last_timestamp = timestamp_us;
        self.sequence = sequence;
        trace!(sequence, frames, timestamp_us, "published audio chunk");
        Ok(timestamp_us)
    }

    /// Largest sample payload the region can hold.
    pub fn max_payload(&self) -> usize {
        self.mem.capacity().saturating_sub(AUDIO_HEADER_SIZE)
    }

    pub fn get_ref(&self) -> &M {
        &self.mem
    }
}

/// Polls a single-slot audio region.
///
/// A chunk is new when its timestamp is later than the last one returned.
/// A regression larger than [`AudioConfig::reset_tolerance`] means the
/// producer restarted; the baseline is dropped and the chunk is returned in
/// the same poll.
pub struct AudioReader<M> {
    mem: M,
    last_seen: i64,
    tolerance_us: i64,
    size_failures: LogThrottle,
}

impl<M: SharedMemory> AudioReader<M> {
    pub fn new(mem: M) -> Self {
        Self::with_config(mem, AudioConfig::default())
    }

    pub fn with_config(mem: M, config: AudioConfig) -> Self {
        Self {
            mem,
            last_seen: 0,
            tolerance_us: i64::try_from(config.reset_tolerance.as_micros()).unwrap_or(i64::MAX),
            size_failures: LogThrottle::new(config.size_log_every),
        }
    }

    pub fn poll_new(&mut self) -> Result<Option<AudioChunk>> {
        let raw = self.mem.read_vec(0, AUDIO_HEADER_SIZE)?;
        let header = match AudioHeader::decode(&raw) {
            Ok(header) => header,
            Err(err) => {
                if !err.is_uninitialized() {
                    trace!(error = %err, "ignoring audio slot");
                }
                return Ok(None);
            }
        };

        if header.timestamp_us <= self.last_seen {
            let regression = self.last_seen.saturating_sub(header.timestamp_us);
            if regression <= self.tolerance_us {
                return Ok(None);
            }
            info!(
                last_seen = self.last_seen,
                timestamp_us = header.timestamp_us,
                "audio timestamp went backwards; resetting baseline"
            );
            self.last_seen = header.timestamp_us.saturating_sub(1);
        }

        let chunk = self.read_chunk(&header)?;
        self.last_seen = chunk.timestamp_us;
        Ok(Some(chunk))
    }

    /// Timestamp of the last chunk returned.
    pub fn last_seen_timestamp(&self) -> i64 {
        self.last_seen
    }

    pub fn reset(&mut self) {
        self.last_seen = 0;
    }

    pub fn size_failures(&self) -> u64 {
        self.size_failures.count()
    }

    pub fn get_ref(&self) -> &M {
        &self.mem
    }

    fn read_chunk(&self, header: &AudioHeader) -> Result<AudioChunk> {
        let available = self.mem.capacity().saturating_sub(AUDIO_HEADER_SIZE);
        let declared = header.payload_len().ok_or_else(|| {
            ChannelError::InvalidPayload(format!(
                "unknown sample format {}",
                header.format.to_wire()
            ))
        })?;
        if declared > available {
            if let Some(occurrences) = self.size_failures.hit() {
                warn!(
                    declared,
                    available,
                    occurrences,
                    "audio chunk size exceeds region capacity"
                );
            }
            return Err(ChannelError::SizeOutOfBounds {
                declared,
                available,
            });
        }

        let samples = self.mem.read_vec(AUDIO_HEADER_SIZE, declared)?;
        fence(Ordering::Acquire);

        let raw = self.mem.read_vec(0, AUDIO_HEADER_SIZE)?;
        match AudioHeader::decode(&raw) {
            Ok(after)
                if after.timestamp_us == header.timestamp_us
                    && after.sequence == header.sequence => {}
            _ => return Err(ChannelError::TornRead { channel: "audio" }),
        }

        Ok(AudioChunk {
            sample_rate: header.sample_rate,
            channels: header.channels,
            frames: header.frames,
            format: header.format,
            timestamp_us: header.timestamp_us,
            sequence: header.sequence,
            samples: Bytes::from(samples),
        })
    }
}
