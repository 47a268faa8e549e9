use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::traits::{check_bounds, Notifier, SharedMemory};

/// An in-process stand-in for a named region.
///
/// Clones share the same bytes, so a writer and a reader built from clones
/// of one `HeapRegion` behave like two attachments of the same mapping.
/// Used for tests and for wiring both ends inside a single process.
#[derive(Clone, Debug)]
pub struct HeapRegion {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl HeapRegion {
    /// Create a zero-filled region of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0u8; capacity])),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SharedMemory for HeapRegion {
    fn capacity(&self) -> usize {
        self.lock().len()
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let bytes = self.lock();
        check_bounds(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        let mut bytes = self.lock();
        check_bounds(offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// An in-process auto-reset event with the same semantics as the named one.
#[derive(Clone, Debug, Default)]
pub struct LocalNotifier {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl LocalNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for LocalNotifier {
    fn notify(&self) -> Result<()> {
        let (flag, cvar) = &*self.state;
        let mut signalled = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *signalled = true;
        cvar.notify_one();
        Ok(())
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        let (flag, cvar) = &*self.state;
        let deadline = Instant::now() + timeout;
        let mut signalled = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*signalled {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = cvar
                .wait_timeout(signalled, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            signalled = guard;
        }
        *signalled = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegionError;

    #[test]
    fn clones_share_bytes() {
        let writer = HeapRegion::new(32);
        let reader = writer.clone();

        writer.write_at(4, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        reader.read_at(4, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn rejects_out_of_bounds_access() {
        let region = HeapRegion::new(8);
        let err = region.write_at(6, b"abc").unwrap_err();
        assert!(matches!(err, RegionError::OutOfBounds { .. }));
        assert!(region.read_vec(0, 9).is_err());
        assert_eq!(region.read_vec(0, 8).unwrap().len(), 8);
    }

    #[test]
    fn notifier_wakes_waiter_across_threads() {
        let notifier = LocalNotifier::new();
        let remote = notifier.clone();
        let handle = std::thread::spawn(move || remote.wait_timeout(Duration::from_secs(5)));

        std::thread::sleep(Duration::from_millis(20));
        notifier.notify().unwrap();
        assert!(handle.join().unwrap().unwrap());
    }

    #[test]
    fn notifier_times_out_and_coalesces() {
        let notifier = LocalNotifier::new();
        assert!(!notifier.wait_timeout(Duration::from_millis(10)).unwrap());

        notifier.notify().unwrap();
        notifier.notify().unwrap();
        assert!(notifier.wait_timeout(Duration::from_millis(10)).unwrap());
        assert!(!notifier.wait_timeout(Duration::from_millis(10)).unwrap());
    }
}
