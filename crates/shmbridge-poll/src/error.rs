use shmbridge_channel::ChannelError;
use shmbridge_region::RegionError;

/// Errors that can occur while attaching or polling channels.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// A region or event could not be attached.
    #[error("region error: {0}")]
    Region(#[from] RegionError),

    /// A channel operation failed.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl PollError {
    /// True when the underlying object is missing or not yet created.
    pub fn is_unavailable(&self) -> bool {
        match self {
            PollError::Region(err) => err.is_retryable(),
            PollError::Channel(ChannelError::Region(err)) => err.is_retryable(),
            PollError::Channel(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, PollError>;
