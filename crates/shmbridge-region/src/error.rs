/// Errors that can occur in shared region operations.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    /// The mapping could not be created or opened.
    #[error("shared region {name} unavailable: {source}")]
    Unavailable {
        name: String,
        source: std::io::Error,
    },

    /// The region name cannot be used on this platform.
    #[error("invalid region name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// A read or write would fall outside the mapped capacity.
    #[error("region access out of bounds (offset {offset}, len {len}, capacity {capacity})")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// The relaxed security descriptor could not be constructed.
    #[error("security descriptor unavailable: {0}")]
    Security(std::io::Error),

    /// The named wake event could not be created, opened, or signalled.
    #[error("wake event {name} unavailable: {source}")]
    EventUnavailable {
        name: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on an attached region or event.
    #[error("region I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegionError {
    /// True when the failure is scoped to a single named object and may
    /// succeed on a later attempt (the other process may not be up yet).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegionError::Unavailable { .. } | RegionError::EventUnavailable { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RegionError>;
