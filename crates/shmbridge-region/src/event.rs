use std::time::Duration;

use tracing::debug;

use crate::error::Result;
use crate::security::AccessPolicy;
use crate::traits::Notifier;

/// A named, auto-reset, cross-process wake event.
///
/// Backed by a named event object on Windows and a named POSIX semaphore
/// elsewhere. Signals coalesce: any number of `notify` calls before a wait
/// wake that wait once.
pub struct NamedEvent {
    name: String,
    inner: platform::RawEvent,
}

// SAFETY: both backends are kernel objects designed for concurrent use from
// any thread; the raw handle is only closed in `Drop`.
unsafe impl Send for NamedEvent {}
// SAFETY: see above.
unsafe impl Sync for NamedEvent {}

impl NamedEvent {
    /// Open the event, creating it if it does not exist yet.
    pub fn open_or_create(name: &str) -> Result<Self> {
        Self::open_or_create_with_policy(name, AccessPolicy::default())
    }

    /// Open or create the event with an explicit access policy.
    pub fn open_or_create_with_policy(name: &str, access: AccessPolicy) -> Result<Self> {
        let inner = platform::open_or_create(name, access)?;
        debug!(name, "opened wake event");
        Ok(Self {
            name: name.to_string(),
            inner,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the event name (POSIX only). Open handles keep working.
    #[cfg(unix)]
    pub fn unlink(name: &str) -> Result<()> {
        platform::unlink(name)
    }
}

impl Notifier for NamedEvent {
    fn notify(&self) -> Result<()> {
        platform::signal(&self.inner, &self.name)
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        platform::wait(&self.inner, &self.name, timeout)
    }
}

impl std::fmt::Debug for NamedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedEvent").field("name", &self.name).finish()
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        platform::close(&self.inner);
    }
}

#[cfg(unix)]
mod platform {
    use std::ffi::CString;
    use std::io;
    use std::time::Duration;
    #[cfg(not(target_os = "linux"))]
    use std::time::Instant;

    use crate::error::{RegionError, Result};
    use crate::region::platform_name;
    use crate::security::{AccessPolicy, RELAXED_MODE};

    pub(super) struct RawEvent(*mut libc::sem_t);

    fn unavailable(name: &str, source: io::Error) -> RegionError {
        RegionError::EventUnavailable {
            name: name.to_string(),
            source,
        }
    }

    fn c_name(name: &str) -> Result<CString> {
        CString::new(platform_name(name)?).map_err(|_| RegionError::InvalidName {
            name: name.to_string(),
            reason: "name must not contain NUL",
        })
    }

    pub(super) fn open_or_create(name: &str, access: AccessPolicy) -> Result<RawEvent> {
        let c_name = c_name(name)?;
        let mode = match access {
            AccessPolicy::Relaxed => RELAXED_MODE,
            AccessPolicy::Inherit => 0o600,
        };
        // SAFETY: `c_name` is NUL-terminated; the variadic mode and initial
        // value arguments are passed as C `unsigned int` as sem_open expects.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                mode as libc::c_uint,
                0 as libc::c_uint,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(unavailable(name, io::Error::last_os_error()));
        }
        Ok(RawEvent(sem))
    }

    pub(super) fn signal(event: &RawEvent, name: &str) -> Result<()> {
        // SAFETY: `event.0` is an open semaphore until `close`.
        if unsafe { libc::sem_post(event.0) } != 0 {
            return Err(unavailable(name, io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Consume pending posts so that several signals wake one wait.
    fn drain(event: &RawEvent) {
        // SAFETY: `event.0` is an open semaphore until `close`.
        while unsafe { libc::sem_trywait(event.0) } == 0 {}
    }

    fn try_take(event: &RawEvent, name: &str) -> Result<bool> {
        // SAFETY: `event.0` is an open semaphore until `close`.
        if unsafe { libc::sem_trywait(event.0) } == 0 {
            drain(event);
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(false),
            _ => Err(unavailable(name, err)),
        }
    }

    #[cfg(target_os = "linux")]
    pub(super) fn wait(event: &RawEvent, name: &str, timeout: Duration) -> Result<bool> {
        if try_take(event, name)? {
            return Ok(true);
        }

        // SAFETY: timespec is plain data filled by clock_gettime.
        let mut deadline: libc::timespec = unsafe { std::mem::zeroed() };
        // SAFETY: `deadline` is a valid out-pointer.
        if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut deadline) } != 0 {
            return Err(unavailable(name, io::Error::last_os_error()));
        }
        let nanos = deadline.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
        deadline.tv_sec +=
            timeout.as_secs() as libc::time_t + (nanos / 1_000_000_000) as libc::time_t;
        deadline.tv_nsec = (nanos % 1_000_000_000) as _;

        loop {
            // SAFETY: `event.0` is open and `deadline` is a valid timespec.
            if unsafe { libc::sem_timedwait(event.0, &deadline) } == 0 {
                drain(event);
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) => return Ok(false),
                _ => return Err(unavailable(name, err)),
            }
        }
    }

    /// Platforms without `sem_timedwait` fall back to short trywait polls.
    #[cfg(not(target_os = "linux"))]
    pub(super) fn wait(event: &RawEvent, name: &str, timeout: Duration) -> Result<bool> {
        const POLL_STEP: Duration = Duration::from_millis(1);
        let deadline = Instant::now() + timeout;
        loop {
            if try_take(event, name)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            std::thread::sleep(POLL_STEP.min(deadline - now));
        }
    }

    pub(super) fn close(event: &RawEvent) {
        // SAFETY: closes the handle opened in `open_or_create`, exactly once.
        unsafe {
            libc::sem_close(event.0);
        }
    }

    pub(super) fn unlink(name: &str) -> Result<()> {
        let c_name = c_name(name)?;
        // SAFETY: `c_name` is NUL-terminated.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
            return Err(unavailable(name, io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::io;
    use std::time::Duration;

    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
    use windows_sys::Win32::System::Threading::{CreateEventW, SetEvent, WaitForSingleObject};

    use crate::error::{RegionError, Result};
    use crate::region::platform_name;
    use crate::security::{security_attributes, AccessPolicy};

    pub(super) struct RawEvent(HANDLE);

    fn unavailable(name: &str, source: io::Error) -> RegionError {
        RegionError::EventUnavailable {
            name: name.to_string(),
            source,
        }
    }

    pub(super) fn open_or_create(name: &str, access: AccessPolicy) -> Result<RawEvent> {
        let wide: Vec<u16> = platform_name(name)?
            .encode_utf16()
            .chain(Some(0))
            .collect();
        let attrs = security_attributes(access, name);
        let sa = attrs.as_ref().map_or(std::ptr::null(), |a| a.as_ptr());
        // SAFETY: `wide` is NUL-terminated; `sa` is null or kept alive by
        // `attrs`. Auto-reset, initially non-signalled.
        let handle = unsafe { CreateEventW(sa, 0, 0, wide.as_ptr()) };
        if handle.is_null() {
            return Err(unavailable(name, io::Error::last_os_error()));
        }
        Ok(RawEvent(handle))
    }

    pub(super) fn signal(event: &RawEvent, name: &str) -> Result<()> {
        // SAFETY: `event.0` is an open event handle until `close`.
        if unsafe { SetEvent(event.0) } == 0 {
            return Err(unavailable(name, io::Error::last_os_error()));
        }
        Ok(())
    }

    pub(super) fn wait(event: &RawEvent, name: &str, timeout: Duration) -> Result<bool> {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        // SAFETY: `event.0` is an open event handle until `close`.
        match unsafe { WaitForSingleObject(event.0, millis) } {
            WAIT_OBJECT_0 => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(unavailable(name, io::Error::last_os_error())),
        }
    }

    pub(super) fn close(event: &RawEvent) {
        // SAFETY: closes the handle opened in `open_or_create`, exactly once.
        unsafe {
            CloseHandle(event.0);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!(
            "shmbridge-ev-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
                % 1_000_000_000
        )
    }

    #[test]
    fn signal_wakes_other_handle() {
        let name = unique_name("wake");
        let writer = NamedEvent::open_or_create(&name).expect("event should open");
        let reader = NamedEvent::open_or_create(&name).expect("event should reopen");

        assert!(!reader.wait_timeout(Duration::from_millis(10)).unwrap());
        writer.notify().unwrap();
        writer.notify().unwrap();
        assert!(reader.wait_timeout(Duration::from_millis(500)).unwrap());
        // Both posts were consumed by the single wake.
        assert!(!reader.wait_timeout(Duration::from_millis(10)).unwrap());

        drop(writer);
        drop(reader);
        NamedEvent::unlink(&name).unwrap();
    }

    #[test]
    fn wait_from_another_thread() {
        let name = unique_name("thread");
        let reader = NamedEvent::open_or_create(&name).unwrap();
        let writer_name = name.clone();
        let handle = std::thread::spawn(move || {
            let writer = NamedEvent::open_or_create(&writer_name).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            writer.notify().unwrap();
        });

        assert!(reader.wait_timeout(Duration::from_secs(5)).unwrap());
        handle.join().unwrap();
        drop(reader);
        NamedEvent::unlink(&name).unwrap();
    }
}
