use shmbridge_region::RegionError;

/// Errors produced while decoding a fixed-layout header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The magic field does not hold the expected constant.
    #[error("invalid header magic 0x{found:08x} (expected 0x{expected:08x})")]
    BadMagic { found: u32, expected: u32 },

    /// Fewer bytes than the header size were supplied.
    #[error("header truncated ({len} bytes, need {need})")]
    Truncated { len: usize, need: usize },
}

impl DecodeError {
    /// True when the magic is zero: the writer has not published anything yet.
    pub fn is_uninitialized(&self) -> bool {
        matches!(self, DecodeError::BadMagic { found: 0, .. })
    }
}

/// Errors that can occur while publishing to or polling a channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The underlying region failed.
    #[error(transparent)]
    Region(#[from] RegionError),

    /// A header could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The header declares more payload than the region can hold.
    #[error("declared payload of {declared} bytes exceeds {available} bytes available")]
    SizeOutOfBounds { declared: usize, available: usize },

    /// The writer replaced the slot while the payload was being read.
    #[error("{channel} slot changed during read")]
    TornRead { channel: &'static str },

    /// A write does not fit in the region.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A payload does not match its header or its declared type.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The command kind cannot be carried by this channel layout.
    #[error("command kind {kind} is not supported by the {layout} layout")]
    UnsupportedKind { layout: &'static str, kind: String },

    /// JSON encoding or decoding of a structured payload failed.
    #[error("payload JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChannelError {
    /// True when the next poll cycle may succeed without intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::TornRead { .. } | ChannelError::SizeOutOfBounds { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_magic_is_uninitialized() {
        let zero = DecodeError::BadMagic {
            found: 0,
            expected: 0x4E45_5552,
        };
        let foreign = DecodeError::BadMagic {
            found: 0xDEAD_BEEF,
            expected: 0x4E45_5552,
        };
        assert!(zero.is_uninitialized());
        assert!(!foreign.is_uninitialized());
        assert!(!DecodeError::Truncated { len: 3, need: 8 }.is_uninitialized());
    }

    #[test]
    fn display_includes_sizes() {
        let err = ChannelError::SizeOutOfBounds {
            declared: 10,
            available: 9,
        };
        assert_eq!(
            err.to_string(),
            "declared payload of 10 bytes exceeds 9 bytes available"
        );
        assert!(err.is_transient());
    }
}
