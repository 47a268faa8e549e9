use std::fmt;
use std::io;

use shmbridge_channel::ChannelError;
use shmbridge_region::RegionError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

fn io_code(err: &io::Error) -> Option<i32> {
    match err.kind() {
        io::ErrorKind::PermissionDenied => Some(PERMISSION_DENIED),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Some(TIMEOUT),
        _ => None,
    }
}

pub fn region_error(context: &str, err: RegionError) -> CliError {
    let code = match &err {
        RegionError::Unavailable { source, .. } | RegionError::EventUnavailable { source, .. } => {
            io_code(source).unwrap_or(TRANSPORT_ERROR)
        }
        RegionError::InvalidName { .. } => USAGE,
        RegionError::OutOfBounds { .. } => DATA_INVALID,
        RegionError::Security(_) => PERMISSION_DENIED,
        RegionError::Io(source) => io_code(source).unwrap_or(INTERNAL),
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Region(err) => region_error(context, err),
        ChannelError::TornRead { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        ChannelError::UnsupportedKind { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        ChannelError::Decode(_)
        | ChannelError::SizeOutOfBounds { .. }
        | ChannelError::PayloadTooLarge { .. }
        | ChannelError::InvalidPayload(_)
        | ChannelError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_region_is_a_transport_error() {
        let err = RegionError::Unavailable {
            name: "video".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(region_error("open", err).code, TRANSPORT_ERROR);
    }

    #[test]
    fn denied_region_maps_to_permission_denied() {
        let err = RegionError::Unavailable {
            name: "video".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(region_error("open", err).code, PERMISSION_DENIED);
    }

    #[test]
    fn oversized_payload_is_invalid_data() {
        let err = ChannelError::PayloadTooLarge { size: 10, max: 4 };
        let cli = channel_error("send", err);
        assert_eq!(cli.code, DATA_INVALID);
        assert!(cli.message.starts_with("send: "));
    }

    #[test]
    fn nested_region_errors_are_unwrapped() {
        let err = ChannelError::Region(RegionError::InvalidName {
            name: "a/b".into(),
            reason: "contains '/'",
        });
        assert_eq!(channel_error("watch", err).code, USAGE);
    }
}
