//! Shared-memory channels between a browser process and an agent process.
//!
//! Video frames, microphone audio and agent commands each travel through
//! their own named shared-memory region: one fixed little-endian header
//! followed by the payload, overwritten in place by a single writer and
//! polled by readers. There is no lock and no queue; readers detect torn
//! reads by re-checking the header and simply try again on the next poll.
//!
//! # Crate Structure
//!
//! - [`region`]: named shared memory, the wake event and the access policy
//! - [`channel`]: header codecs and the video, audio and command channels
//! - [`poll`]: the consumer loop (behind the `poll` feature)

/// Re-export region types.
pub mod region {
    pub use shmbridge_region::*;
}

/// Re-export channel types.
pub mod channel {
    pub use shmbridge_channel::*;
}

/// Re-export the consumer loop (requires `poll` feature).
#[cfg(feature = "poll")]
pub mod poll {
    pub use shmbridge_poll::*;
}
