use std::sync::atomic::{fence, Ordering};

use bytes::Bytes;
use shmbridge_region::SharedMemory;
use tracing::{debug, trace, warn};

use crate::clock::unix_micros;
use crate::codec::{PixelFormat, VideoHeader, WireHeader, VIDEO_HEADER_SIZE};
use crate::error::{ChannelError, Result};
use crate::throttle::{LogThrottle, DEFAULT_LOG_EVERY};

/// Configuration for a video reader.
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Log repeated size-check failures on the first and then every Nth hit.
    pub size_log_every: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            size_log_every: DEFAULT_LOG_EVERY,
        }
    }
}

/// One frame copied out of the slot.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: u64,
    pub timestamp_us: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub row_bytes: u32,
    pub pixels: Bytes,
}

/// Publishes frames into a single-slot video region.
///
/// Each publish overwrites the previous frame. Frame indices continue from
/// whatever index is already in the region, so a restarted writer never
/// moves the index backwards.
pub struct FrameWriter<M> {
    mem: M,
    last_index: u64,
}

impl<M: SharedMemory> FrameWriter<M> {
    /// Attach a writer, resuming the frame index found in the region.
    pub fn new(mem: M) -> Result<Self> {
        let raw = mem.read_vec(0, VIDEO_HEADER_SIZE)?;
        let last_index = VideoHeader::decode(&raw).map_or(0, |h| h.frame_index);
        if last_index > 0 {
            debug!(last_index, "resuming video frame index");
        }
        Ok(Self { mem, last_index })
    }

    /// Publish a frame stamped with the current wall clock.
    ///
    /// `row_bytes` of 0 means rows are tightly packed (`width * 4`).
    /// Returns the index assigned to the frame.
    pub fn publish(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        row_bytes: u32,
        pixels: &[u8],
    ) -> Result<u64> {
        self.publish_at(width, height, format, row_bytes, pixels, unix_micros())
    }

    /// Publish a frame with a caller-supplied timestamp in microseconds.
    pub fn publish_at(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        row_bytes: u32,
        pixels: &[u8],
        timestamp_us: i64,
    ) -> Result<u64> {
        let max = self.max_payload();
        if pixels.len() > max {
            return Err(ChannelError::PayloadTooLarge {
                size: pixels.len(),
                max,
            });
        }
        if row_bytes != 0 && u64::from(row_bytes) < u64::from(width) * 4 {
            return Err(ChannelError::InvalidPayload(format!(
                "row_bytes {row_bytes} is shorter than {width} pixels"
            )));
        }

        let mut header = VideoHeader::new(width, height, format, row_bytes);
        let expected = header.payload_len();
        if pixels.len() != expected {
            return Err(ChannelError::InvalidPayload(format!(
                "expected {expected} pixel bytes for {width}x{height}, got {}",
                pixels.len()
            )));
        }

        let index = self.last_index + 1;
        header.frame_index = index;
        header.timestamp_us = timestamp_us;

        self.mem.write_at(0, &header.encode())?;
        fence(Ordering::Release);
        self.mem.write_at(VIDEO_HEADER_SIZE, pixels)?;

        self.last_index = index;
        trace!(index, width, height, bytes = pixels.len(), "published video frame");
        Ok(index)
    }

    /// Largest pixel payload the region can hold.
    pub fn max_payload(&self) -> usize {
        self.mem.capacity().saturating_sub(VIDEO_HEADER_SIZE)
    }

    /// Index of the last frame written by this writer (or found at attach).
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    pub fn get_ref(&self) -> &M {
        &self.mem
    }
}

/// Polls a single-slot video region for new frames.
///
/// An uninitialized or foreign header reads as "no frame". A frame whose
/// header changes while its pixels are copied is reported as
/// [`ChannelError::TornRead`] and can be retried on the next poll.
pub struct FrameReader<M> {
    mem: M,
    last_seen: u64,
    size_failures: LogThrottle,
}

impl<M: SharedMemory> FrameReader<M> {
    pub fn new(mem: M) -> Self {
        Self::with_config(mem, VideoConfig::default())
    }

    pub fn with_config(mem: M, config: VideoConfig) -> Self {
        Self {
            mem,
            last_seen: 0,
            size_failures: LogThrottle::new(config.size_log_every),
        }
    }

    /// Return the current frame if its index is newer than the last one
    /// returned, advancing the reader.
    pub fn poll_latest(&mut self) -> Result<Option<VideoFrame>> {
        let frame = self.poll_newer_than(self.last_seen)?;
        if let Some(frame) = &frame {
            self.last_seen = frame.index;
        }
        Ok(frame)
    }

    /// Stateless variant of [`poll_latest`](Self::poll_latest).
    pub fn poll_newer_than(&self, last_seen: u64) -> Result<Option<VideoFrame>> {
        match self.read_header()? {
            Some(header) if header.frame_index > last_seen => self.read_frame(&header).map(Some),
            _ => Ok(None),
        }
    }

    /// Copy whatever frame is in the slot, ignoring the last seen index.
    pub fn capture_current(&self) -> Result<Option<VideoFrame>> {
        match self.read_header()? {
            Some(header) => self.read_frame(&header).map(Some),
            None => Ok(None),
        }
    }

    /// Index of the last frame returned by `poll_latest`.
    pub fn last_seen_index(&self) -> u64 {
        self.last_seen
    }

    /// Forget the last seen index, e.g. after reattaching to a recreated
    /// region.
    pub fn reset(&mut self) {
        self.last_seen = 0;
    }

    /// Number of size-check failures seen so far.
    pub fn size_failures(&self) -> u64 {
        self.size_failures.count()
    }

    pub fn get_ref(&self) -> &M {
        &self.mem
    }

    fn read_header(&self) -> Result<Option<VideoHeader>> {
        let raw = self.mem.read_vec(0, VIDEO_HEADER_SIZE)?;
        match VideoHeader::decode(&raw) {
            Ok(header) => Ok(Some(header)),
            Err(err) => {
                if !err.is_uninitialized() {
                    trace!(error = %err, "ignoring video slot");
                }
                Ok(None)
            }
        }
    }

    fn read_frame(&self, header: &VideoHeader) -> Result<VideoFrame> {
        let declared = header.payload_len();
        let available = self.mem.capacity().saturating_sub(VIDEO_HEADER_SIZE);
        if declared > available {
            if let Some(occurrences) = self.size_failures.hit() {
                warn!(
                    declared,
                    available,
                    occurrences,
                    index = header.frame_index,
                    "video frame size exceeds region capacity"
                );
            }
            return Err(ChannelError::SizeOutOfBounds {
                declared,
                available,
            });
        }

        let pixels = self.mem.read_vec(VIDEO_HEADER_SIZE, declared)?;
        fence(Ordering::Acquire);

        let raw = self.mem.read_vec(0, VIDEO_HEADER_SIZE)?;
        match VideoHeader::decode(&raw) {
            Ok(after)
                if after.frame_index == header.frame_index
                    && after.timestamp_us == header.timestamp_us => {}
            _ => return Err(ChannelError::TornRead { channel: "video" }),
        }

        Ok(VideoFrame {
            index: header.frame_index,
            timestamp_us: header.timestamp_us,
            width: header.width,
            height: header.height,
            format: header.format,
            row_bytes: header.row_bytes,
            pixels: Bytes::from(pixels),
        })
    }
}
