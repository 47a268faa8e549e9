use bytes::{Buf, BufMut};

use crate::error::DecodeError;

/// Video header magic: "NEUR".
pub const VIDEO_MAGIC: u32 = 0x4E45_5552;

/// Video header layout version written by this crate.
pub const VIDEO_VERSION: u32 = 3;

/// Video header: 176 bytes, payload follows immediately.
pub const VIDEO_HEADER_SIZE: usize = 176;

/// Length of the opaque reserved block in the video header.
pub const VIDEO_RESERVED_LEN: usize = 128;

/// Audio header magic: "AUDI".
pub const AUDIO_MAGIC: u32 = 0x4155_4449;

/// Audio header: 32 bytes, payload follows immediately.
pub const AUDIO_HEADER_SIZE: usize = 32;

/// Structured command header magic, shared with the video header.
pub const COMMAND_MAGIC: u32 = VIDEO_MAGIC;

/// Structured command header layout version.
pub const COMMAND_VERSION: u32 = 1;

/// Structured command header: 24 bytes, payload follows immediately.
pub const COMMAND_HEADER_SIZE: usize = 24;

/// Text command header (revision + length): 8 bytes.
pub const TEXT_HEADER_SIZE: usize = 8;

/// A fixed-layout little-endian header at offset 0 of a region.
///
/// Layouts are hand-encoded field by field; no Rust struct is ever
/// reinterpreted as bytes. Decoding only fails on a short buffer or a magic
/// mismatch. Length fields come back raw and are bounds-checked by the
/// channel that owns the region.
pub trait WireHeader: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Append exactly `SIZE` bytes to `dst`.
    fn write_to(&self, dst: &mut impl BufMut);

    /// Parse from a buffer that holds at least `SIZE` bytes.
    fn read_from(src: &mut impl Buf) -> Result<Self, DecodeError>;

    /// Decode from the front of `src`.
    fn decode(src: &[u8]) -> Result<Self, DecodeError> {
        if src.len() < Self::SIZE {
            return Err(DecodeError::Truncated {
                len: src.len(),
                need: Self::SIZE,
            });
        }
        let mut buf = &src[..Self::SIZE];
        Self::read_from(&mut buf)
    }

    /// Encode into a new buffer of `SIZE` bytes.
    fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.write_to(&mut out);
        out
    }
}

fn expect_magic(src: &mut impl Buf, expected: u32) -> Result<(), DecodeError> {
    let found = src.get_u32_le();
    if found != expected {
        return Err(DecodeError::BadMagic { found, expected });
    }
    Ok(())
}

/// Pixel layout of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Unspecified,
    Bgra8,
    Rgba8,
    Other(u32),
}

impl PixelFormat {
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            0 => PixelFormat::Unspecified,
            1 => PixelFormat::Bgra8,
            2 => PixelFormat::Rgba8,
            other => PixelFormat::Other(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            PixelFormat::Unspecified => 0,
            PixelFormat::Bgra8 => 1,
            PixelFormat::Rgba8 => 2,
            PixelFormat::Other(raw) => raw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Unspecified => "unspecified",
            PixelFormat::Bgra8 => "bgra8",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Other(_) => "other",
        }
    }
}

/// Sample encoding of an audio chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    PcmI16,
    F32,
    Other(u32),
}

impl SampleFormat {
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            0 => SampleFormat::PcmI16,
            1 => SampleFormat::F32,
            other => SampleFormat::Other(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            SampleFormat::PcmI16 => 0,
            SampleFormat::F32 => 1,
            SampleFormat::Other(raw) => raw,
        }
    }

    /// Bytes per sample, or `None` for an unknown encoding.
    pub fn bytes_per_sample(self) -> Option<usize> {
        match self {
            SampleFormat::PcmI16 => Some(2),
            SampleFormat::F32 => Some(4),
            SampleFormat::Other(_) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::PcmI16 => "pcm16",
            SampleFormat::F32 => "f32",
            SampleFormat::Other(_) => "other",
        }
    }
}

/// Type code carried by the structured command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    SetMode,
    SetOmniboxText,
    ExecuteAction,
    Unknown(u32),
}

impl CommandType {
    pub fn from_wire(raw: u32) -> Self {
        match raw {
            1 => CommandType::SetMode,
            2 => CommandType::SetOmniboxText,
            3 => CommandType::ExecuteAction,
            other => CommandType::Unknown(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            CommandType::SetMode => 1,
            CommandType::SetOmniboxText => 2,
            CommandType::ExecuteAction => 3,
            CommandType::Unknown(raw) => raw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandType::SetMode => "set-mode",
            CommandType::SetOmniboxText => "set-omnibox-text",
            CommandType::ExecuteAction => "execute-action",
            CommandType::Unknown(_) => "unknown",
        }
    }
}

/// Video frame header.
///
/// ```text
/// offset  field          type
///      0  magic          u32   0x4E455552 "NEUR"
///      4  version        u32
///      8  width          u32
///     12  height         u32
///     16  format         u32
///     20  (padding)      u32
///     24  frame_index    u64
///     32  timestamp_us   i64
///     40  row_bytes      u32
///     44  reserved       [u8; 128]
///    172  (padding)      u32
///    176  pixels ...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoHeader {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub frame_index: u64,
    pub timestamp_us: i64,
    pub row_bytes: u32,
    pub reserved: [u8; VIDEO_RESERVED_LEN],
}

impl VideoHeader {
    /// A current-version header with zeroed reserved bytes.
    pub fn new(width: u32, height: u32, format: PixelFormat, row_bytes: u32) -> Self {
        Self {
            version: VIDEO_VERSION,
            width,
            height,
            format,
            frame_index: 0,
            timestamp_us: 0,
            row_bytes,
            reserved: [0u8; VIDEO_RESERVED_LEN],
        }
    }

    /// Row stride, treating 0 as tightly packed 4-byte pixels.
    pub fn stride(&self) -> u64 {
        if self.row_bytes == 0 {
            u64::from(self.width) * 4
        } else {
            u64::from(self.row_bytes)
        }
    }

    /// Declared payload size. Saturates instead of overflowing so that a
    /// corrupt header always fails the channel's bounds check.
    pub fn payload_len(&self) -> usize {
        let len = self.stride().saturating_mul(u64::from(self.height));
        usize::try_from(len).unwrap_or(usize::MAX)
    }

    pub fn encode(&self) -> [u8; VIDEO_HEADER_SIZE] {
        let mut out = [0u8; VIDEO_HEADER_SIZE];
        let mut dst = &mut out[..];
        self.write_to(&mut dst);
        out
    }
}

impl WireHeader for VideoHeader {
    const SIZE: usize = VIDEO_HEADER_SIZE;

    fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(VIDEO_MAGIC);
        dst.put_u32_le(self.version);
        dst.put_u32_le(self.width);
        dst.put_u32_le(self.height);
        dst.put_u32_le(self.format.to_wire());
        dst.put_u32_le(0);
        dst.put_u64_le(self.frame_index);
        dst.put_i64_le(self.timestamp_us);
        dst.put_u32_le(self.row_bytes);
        dst.put_slice(&self.reserved);
        dst.put_u32_le(0);
    }

    fn read_from(src: &mut impl Buf) -> Result<Self, DecodeError> {
        expect_magic(src, VIDEO_MAGIC)?;
        let version = src.get_u32_le();
        let width = src.get_u32_le();
        let height = src.get_u32_le();
        let format = PixelFormat::from_wire(src.get_u32_le());
        src.advance(4);
        let frame_index = src.get_u64_le();
        let timestamp_us = src.get_i64_le();
        let row_bytes = src.get_u32_le();
        let mut reserved = [0u8; VIDEO_RESERVED_LEN];
        src.copy_to_slice(&mut reserved);
        src.advance(4);

        Ok(Self {
            version,
            width,
            height,
            format,
            frame_index,
            timestamp_us,
            row_bytes,
            reserved,
        })
    }
}

/// Audio chunk header.
///
/// ```text
/// offset  field          type
///      0  magic          u32   0x41554449 "AUDI"
///      4  sample_rate    u32
///      8  channels       u32
///     12  frames         u32
///     16  timestamp_us   i64
///     24  format         u32
///     28  sequence       u32
///     32  samples ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub sample_rate: u32,
    pub channels: u32,
    pub frames: u32,
    pub timestamp_us: i64,
    pub format: SampleFormat,
    pub sequence: u32,
}

impl AudioHeader {
    /// Declared payload size, or `None` for an unknown sample format.
    pub fn payload_len(&self) -> Option<usize> {
        let bytes = self.format.bytes_per_sample()? as u64;
        let len = u64::from(self.frames)
            .saturating_mul(u64::from(self.channels))
            .saturating_mul(bytes);
        Some(usize::try_from(len).unwrap_or(usize::MAX))
    }

    pub fn encode(&self) -> [u8; AUDIO_HEADER_SIZE] {
        let mut out = [0u8; AUDIO_HEADER_SIZE];
        let mut dst = &mut out[..];
        self.write_to(&mut dst);
        out
    }
}

impl WireHeader for AudioHeader {
    const SIZE: usize = AUDIO_HEADER_SIZE;

    fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(AUDIO_MAGIC);
        dst.put_u32_le(self.sample_rate);
        dst.put_u32_le(self.channels);
        dst.put_u32_le(self.frames);
        dst.put_i64_le(self.timestamp_us);
        dst.put_u32_le(self.format.to_wire());
        dst.put_u32_le(self.sequence);
    }

    fn read_from(src: &mut impl Buf) -> Result<Self, DecodeError> {
        expect_magic(src, AUDIO_MAGIC)?;
        Ok(Self {
            sample_rate: src.get_u32_le(),
            channels: src.get_u32_le(),
            frames: src.get_u32_le(),
            timestamp_us: src.get_i64_le(),
            format: SampleFormat::from_wire(src.get_u32_le()),
            sequence: src.get_u32_le(),
        })
    }
}

/// Structured command header.
///
/// ```text
/// offset  field          type
///      0  magic          u32   0x4E455552
///      4  version        u32
///      8  type           u32
///     12  data_size      u32
///     16  timestamp_ms   u64
///     24  payload ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub version: u32,
    pub command_type: CommandType,
    pub data_size: u32,
    pub timestamp_ms: u64,
}

impl CommandHeader {
    pub fn encode(&self) -> [u8; COMMAND_HEADER_SIZE] {
        let mut out = [0u8; COMMAND_HEADER_SIZE];
        let mut dst = &mut out[..];
        self.write_to(&mut dst);
        out
    }
}

impl WireHeader for CommandHeader {
    const SIZE: usize = COMMAND_HEADER_SIZE;

    fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(COMMAND_MAGIC);
        dst.put_u32_le(self.version);
        dst.put_u32_le(self.command_type.to_wire());
        dst.put_u32_le(self.data_size);
        dst.put_u64_le(self.timestamp_ms);
    }

    fn read_from(src: &mut impl Buf) -> Result<Self, DecodeError> {
        expect_magic(src, COMMAND_MAGIC)?;
        Ok(Self {
            version: src.get_u32_le(),
            command_type: CommandType::from_wire(src.get_u32_le()),
            data_size: src.get_u32_le(),
            timestamp_ms: src.get_u64_le(),
        })
    }
}

/// Text command header: `revision: u32, length: u32`, then UTF-8 bytes.
///
/// There is no magic; revision 0 means nothing has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextHeader {
    pub revision: u32,
    pub length: u32,
}

impl TextHeader {
    pub fn encode(&self) -> [u8; TEXT_HEADER_SIZE] {
        let mut out = [0u8; TEXT_HEADER_SIZE];
        let mut dst = &mut out[..];
        self.write_to(&mut dst);
        out
    }
}

impl WireHeader for TextHeader {
    const SIZE: usize = TEXT_HEADER_SIZE;

    fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.revision);
        dst.put_u32_le(self.length);
    }

    fn read_from(src: &mut impl Buf) -> Result<Self, DecodeError> {
        Ok(Self {
            revision: src.get_u32_le(),
            length: src.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_video() -> VideoHeader {
        let mut header = VideoHeader::new(1920, 1080, PixelFormat::Bgra8, 7680);
        header.frame_index = 0x0102_0304_0506_0708;
        header.timestamp_us = -5;
        header.reserved[0] = 0xAA;
        header.reserved[127] = 0xBB;
        header
    }

    #[test]
    fn video_header_roundtrip() {
        let header = sample_video();
        let bytes = header.encode();
        assert_eq!(VideoHeader::decode(&bytes).unwrap(), header);
        assert_eq!(header.to_vec(), bytes.to_vec());
    }

    #[test]
    fn video_header_field_offsets() {
        let bytes = sample_video().encode();
        assert_eq!(&bytes[0..4], &VIDEO_MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..8], &VIDEO_VERSION.to_le_bytes());
        assert_eq!(&bytes[8..12], &1920u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &1u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &[0u8; 4]);
        assert_eq!(&bytes[24..32], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[32..40], &(-5i64).to_le_bytes());
        assert_eq!(&bytes[40..44], &7680u32.to_le_bytes());
        assert_eq!(bytes[44], 0xAA);
        assert_eq!(bytes[171], 0xBB);
        assert_eq!(&bytes[172..176], &[0u8; 4]);
    }

    #[test]
    fn video_payload_len_uses_stride() {
        let header = VideoHeader::new(1920, 1080, PixelFormat::Bgra8, 7680);
        assert_eq!(header.payload_len(), 8_294_400);

        let padded = VideoHeader::new(3, 2, PixelFormat::Rgba8, 16);
        assert_eq!(padded.payload_len(), 32);

        let packed = VideoHeader::new(3, 2, PixelFormat::Rgba8, 0);
        assert_eq!(packed.payload_len(), 24);
    }

    #[test]
    fn audio_header_roundtrip_and_offsets() {
        let header = AudioHeader {
            sample_rate: 48_000,
            channels: 2,
            frames: 480,
            timestamp_us: 123_456_789,
            format: SampleFormat::F32,
            sequence: 7,
        };
        let bytes = header.encode();
        assert_eq!(AudioHeader::decode(&bytes).unwrap(), header);
        assert_eq!(&bytes[0..4], &AUDIO_MAGIC.to_le_bytes());
        assert_eq!(&bytes[16..24], &123_456_789i64.to_le_bytes());
        assert_eq!(&bytes[28..32], &7u32.to_le_bytes());
        assert_eq!(header.payload_len(), Some(480 * 2 * 4));
    }

    #[test]
    fn command_headers_roundtrip() {
        let structured = CommandHeader {
            version: COMMAND_VERSION,
            command_type: CommandType::SetOmniboxText,
            data_size: 1024,
            timestamp_ms: 1_700_000_000_000,
        };
        let bytes = structured.encode();
        assert_eq!(CommandHeader::decode(&bytes).unwrap(), structured);
        assert_eq!(&bytes[8..12], &2u32.to_le_bytes());
        assert_eq!(&bytes[16..24], &1_700_000_000_000u64.to_le_bytes());

        let text = TextHeader {
            revision: 5,
            length: 16,
        };
        assert_eq!(TextHeader::decode(&text.encode()).unwrap(), text);
    }

    #[test]
    fn zero_magic_reads_as_uninitialized() {
        let err = VideoHeader::decode(&[0u8; VIDEO_HEADER_SIZE]).unwrap_err();
        assert!(err.is_uninitialized());

        let mut foreign = [0u8; AUDIO_HEADER_SIZE];
        foreign[..4].copy_from_slice(&VIDEO_MAGIC.to_le_bytes());
        let err = AudioHeader::decode(&foreign).unwrap_err();
        assert_eq!(
            err,
            DecodeError::BadMagic {
                found: VIDEO_MAGIC,
                expected: AUDIO_MAGIC
            }
        );
        assert!(!err.is_uninitialized());
    }

    #[test]
    fn short_buffer_is_truncated() {
        let err = CommandHeader::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(err, DecodeError::Truncated { len: 10, need: 24 });
    }

    #[test]
    fn unknown_codes_are_preserved() {
        let header = CommandHeader {
            version: COMMAND_VERSION,
            command_type: CommandType::Unknown(99),
            data_size: 0,
            timestamp_ms: 1,
        };
        let decoded = CommandHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.command_type, CommandType::Unknown(99));
        assert_eq!(PixelFormat::from_wire(7), PixelFormat::Other(7));
        assert_eq!(SampleFormat::Other(5).bytes_per_sample(), None);
    }

    #[test]
    fn lengths_are_returned_raw() {
        let mut header = VideoHeader::new(u32::MAX, u32::MAX, PixelFormat::Bgra8, u32::MAX);
        header.frame_index = 1;
        let decoded = VideoHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.row_bytes, u32::MAX);
        assert!(decoded.payload_len() >= u32::MAX as usize);
    }
}
