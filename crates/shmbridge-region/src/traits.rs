use std::time::Duration;

use crate::error::{RegionError, Result};

/// Raw byte access to a fixed-capacity region shared with another process.
///
/// Implementations are unsynchronized: a concurrent writer in another process
/// may change bytes while a read is in progress. Callers detect that with
/// header revalidation, not with locks. No method blocks.
pub trait SharedMemory {
    /// Total mapped size in bytes.
    fn capacity(&self) -> usize;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Copy `data` into the region starting at `offset`.
    fn write_at(&self, offset: usize, data: &[u8]) -> Result<()>;

    /// Read `len` bytes starting at `offset` into a new buffer.
    fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        check_bounds(offset, len, self.capacity())?;
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<T: SharedMemory + ?Sized> SharedMemory for &T {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        (**self).write_at(offset, data)
    }
}

impl<T: SharedMemory + ?Sized> SharedMemory for std::sync::Arc<T> {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        (**self).write_at(offset, data)
    }
}

/// An advisory wake-up primitive shared between a writer and its readers.
///
/// A missed or failed notification must never leave a reader permanently
/// stale, so readers always re-poll after `wait_timeout` returns, whatever
/// the result.
pub trait Notifier: Send + Sync {
    /// Wake one waiting reader. Notifications coalesce.
    fn notify(&self) -> Result<()>;

    /// Block until notified or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when a notification was consumed.
    fn wait_timeout(&self, timeout: Duration) -> Result<bool>;
}

/// Verify that `[offset, offset + len)` lies within `capacity`.
pub fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(RegionError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_accept_exact_fit() {
        assert!(check_bounds(0, 16, 16).is_ok());
        assert!(check_bounds(16, 0, 16).is_ok());
    }

    #[test]
    fn bounds_reject_overrun_and_overflow() {
        assert!(matches!(
            check_bounds(1, 16, 16),
            Err(RegionError::OutOfBounds {
                offset: 1,
                len: 16,
                capacity: 16
            })
        ));
        assert!(check_bounds(usize::MAX, 2, 16).is_err());
    }
}
