use std::ptr::NonNull;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{RegionError, Result};
use crate::security::AccessPolicy;
use crate::traits::{check_bounds, SharedMemory};

/// Longest object name accepted on POSIX systems (`NAME_MAX`).
#[cfg(unix)]
const MAX_NAME_LEN: usize = 255;

/// Configuration for attaching to a named region.
#[derive(Debug, Clone)]
pub struct RegionConfig {
    /// Security applied when this process is the one creating the region.
    pub access: AccessPolicy,
    /// Extra attempts made when a create/open race is lost.
    pub create_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            access: AccessPolicy::Relaxed,
            create_retries: 3,
            retry_delay: Duration::from_millis(10),
        }
    }
}

/// A named, fixed-size memory mapping shared with other processes.
///
/// Whichever process attaches first creates the object; later attachments
/// map the same bytes. Dropping a `SharedRegion` unmaps this process's view
/// only. The named object itself is left to the OS (Windows destroys it
/// with the last handle; POSIX keeps it until [`SharedRegion::unlink`]).
pub struct SharedRegion {
    name: String,
    ptr: NonNull<u8>,
    len: usize,
    created: bool,
    #[cfg(windows)]
    handle: windows_sys::Win32::Foundation::HANDLE,
}

// SAFETY: the mapping is process-wide memory; all access goes through raw
// copies bounded by `len`, and the pointer stays valid until `Drop`.
unsafe impl Send for SharedRegion {}
// SAFETY: see above. Concurrent access is unsynchronized by contract and is
// validated at the protocol layer.
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Attach to `name`, creating it with `size` bytes if it does not exist.
    pub fn open_or_create(name: &str, size: usize) -> Result<Self> {
        Self::open_or_create_with_config(name, size, &RegionConfig::default())
    }

    /// Attach to `name`, creating it if needed, with explicit configuration.
    pub fn open_or_create_with_config(
        name: &str,
        size: usize,
        config: &RegionConfig,
    ) -> Result<Self> {
        Self::attach(name, size, config, true)
    }

    /// Attach to an existing region; never creates.
    pub fn open_existing(name: &str, size: usize) -> Result<Self> {
        Self::attach(name, size, &RegionConfig::default(), false)
    }

    /// Attach to an existing region with explicit configuration.
    pub fn open_existing_with_config(
        name: &str,
        size: usize,
        config: &RegionConfig,
    ) -> Result<Self> {
        Self::attach(name, size, config, false)
    }

    fn attach(name: &str, size: usize, config: &RegionConfig, create: bool) -> Result<Self> {
        if size == 0 {
            return Err(RegionError::Unavailable {
                name: name.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "region size must be non-zero",
                ),
            });
        }

        let region = platform::attach(name, size, config, create)?;
        if region.created {
            info!(name, size, access = config.access.as_str(), "created shared region");
        } else {
            debug!(name, size, "attached to existing shared region");
        }
        Ok(region)
    }

    /// The caller-supplied name of this region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when this process created the named object.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Remove the name so that new attachments create a fresh region.
    ///
    /// Existing mappings stay valid. Never called implicitly.
    #[cfg(unix)]
    pub fn unlink(name: &str) -> Result<()> {
        platform::unlink(name)
    }
}

impl SharedMemory for SharedRegion {
    fn capacity(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        // SAFETY: bounds were checked against the mapped length, and `buf`
        // cannot alias the mapping because it is an exclusive Rust borrow.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        Ok(())
    }

    fn write_at(&self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(offset, data.len(), self.len)?;
        // SAFETY: bounds were checked against the mapped length; the mapping
        // is writable for the life of `self`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.as_ptr().add(offset),
                data.len(),
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("created", &self.created)
            .finish()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        platform::release(self);
        debug!(name = %self.name, "unmapped shared region");
    }
}

/// Translate a caller-supplied region name into the platform's namespace.
///
/// POSIX names get a single leading `/`; Windows session prefixes
/// (`Local\`, `Global\`) are dropped there since they have no meaning.
/// On Windows the name is used verbatim.
pub fn platform_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(RegionError::InvalidName {
            name: name.to_string(),
            reason: "name must not be empty",
        });
    }

    #[cfg(unix)]
    {
        let bare = name
            .strip_prefix("Local\\")
            .or_else(|| name.strip_prefix("Global\\"))
            .unwrap_or(name);
        let bare = bare.strip_prefix('/').unwrap_or(bare);
        if bare.is_empty() {
            return Err(RegionError::InvalidName {
                name: name.to_string(),
                reason: "name must not be empty",
            });
        }
        if bare.contains('/') || bare.contains('\0') {
            return Err(RegionError::InvalidName {
                name: name.to_string(),
                reason: "name must not contain '/' or NUL after the leading slash",
            });
        }
        if bare.len() + 1 > MAX_NAME_LEN {
            return Err(RegionError::InvalidName {
                name: name.to_string(),
                reason: "name longer than 255 bytes",
            });
        }
        Ok(format!("/{bare}"))
    }

    #[cfg(not(unix))]
    {
        if name.contains('\0') {
            return Err(RegionError::InvalidName {
                name: name.to_string(),
                reason: "name must not contain NUL",
            });
        }
        Ok(name.to_string())
    }
}

#[cfg(unix)]
mod platform {
    use std::ffi::CString;
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
    use std::ptr::NonNull;

    use tracing::debug;

    use super::{platform_name, RegionConfig, SharedRegion};
    use crate::error::{RegionError, Result};
    use crate::security::{relax_fd, AccessPolicy, RELAXED_MODE};

    const OWNER_MODE: u32 = 0o600;

    pub(super) fn attach(
        name: &str,
        size: usize,
        config: &RegionConfig,
        create: bool,
    ) -> Result<SharedRegion> {
        let os_name = platform_name(name)?;
        let c_name = CString::new(os_name).map_err(|_| RegionError::InvalidName {
            name: name.to_string(),
            reason: "name must not contain NUL",
        })?;
        let unavailable = |source: io::Error| RegionError::Unavailable {
            name: name.to_string(),
            source,
        };

        let create_mode = match config.access {
            AccessPolicy::Relaxed => RELAXED_MODE,
            AccessPolicy::Inherit => OWNER_MODE,
        } as libc::mode_t;

        let mut last_err = io::Error::from(io::ErrorKind::NotFound);
        for attempt in 0..=config.create_retries {
            if attempt > 0 {
                std::thread::sleep(config.retry_delay);
            }

            if create {
                // SAFETY: `c_name` is a valid NUL-terminated string.
                let fd = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                        create_mode,
                    )
                };
                if fd >= 0 {
                    // SAFETY: `fd` was just returned by shm_open and is owned here.
                    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
                    relax_fd(config.access, fd.as_raw_fd(), name);
                    if let Err(err) = truncate(&fd, size) {
                        // Do not leave a zero-length object behind for others.
                        // SAFETY: `c_name` is a valid NUL-terminated string.
                        unsafe { libc::shm_unlink(c_name.as_ptr()) };
                        return Err(unavailable(err));
                    }
                    return map(name, &fd, size, true).map_err(unavailable);
                }

                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EEXIST) => {}
                    Some(libc::EINTR) => {
                        last_err = err;
                        continue;
                    }
                    _ => return Err(unavailable(err)),
                }
            }

            // SAFETY: `c_name` is a valid NUL-terminated string.
            let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
            if fd < 0 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    // Lost a race with an unlink, or the creator is not up yet.
                    Some(libc::ENOENT) | Some(libc::EINTR) => {
                        debug!(name, attempt, "region not present yet");
                        last_err = err;
                        continue;
                    }
                    _ => return Err(unavailable(err)),
                }
            }
            // SAFETY: `fd` was just returned by shm_open and is owned here.
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };

            let current = object_size(&fd).map_err(unavailable)?;
            if current < size {
                if current == 0 && attempt < config.create_retries {
                    // The creator has not sized the object yet.
                    last_err = io::Error::new(io::ErrorKind::WouldBlock, "region not sized yet");
                    continue;
                }
                truncate(&fd, size).map_err(unavailable)?;
            }
            return map(name, &fd, size, false).map_err(unavailable);
        }

        Err(unavailable(last_err))
    }

    fn truncate(fd: &OwnedFd, size: usize) -> io::Result<()> {
        let len = libc::off_t::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "region size too large"))?;
        // SAFETY: `fd` is an open shared memory descriptor.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), len) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn object_size(fd: &OwnedFd) -> io::Result<usize> {
        // SAFETY: `stat` is plain data, fully written by fstat on success.
        let mut stat: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: `fd` is open and `stat` is a valid out-pointer.
        if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(usize::try_from(stat.st_size).unwrap_or(0))
    }

    fn map(name: &str, fd: &OwnedFd, size: usize, created: bool) -> io::Result<SharedRegion> {
        // SAFETY: mapping a shared, read/write view of an open descriptor of
        // at least `size` bytes; the result is checked for MAP_FAILED.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;

        Ok(SharedRegion {
            name: name.to_string(),
            ptr,
            len: size,
            created,
        })
    }

    pub(super) fn release(region: &mut SharedRegion) {
        // SAFETY: `ptr`/`len` describe a mapping created by `map` that has
        // not been unmapped yet.
        unsafe {
            libc::munmap(region.ptr.as_ptr().cast(), region.len);
        }
    }

    pub(super) fn unlink(name: &str) -> Result<()> {
        let os_name = platform_name(name)?;
        let c_name = CString::new(os_name).map_err(|_| RegionError::InvalidName {
            name: name.to_string(),
            reason: "name must not contain NUL",
        })?;
        // SAFETY: `c_name` is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } != 0 {
            return Err(RegionError::Unavailable {
                name: name.to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::io;
    use std::ptr::NonNull;

    use tracing::debug;
    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, HANDLE,
        INVALID_HANDLE_VALUE,
    };
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile,
        FILE_MAP_ALL_ACCESS, MEMORY_MAPPED_VIEW_ADDRESS, PAGE_READWRITE,
    };

    use super::{platform_name, RegionConfig, SharedRegion};
    use crate::error::{RegionError, Result};
    use crate::security::security_attributes;

    pub(crate) fn to_wide(name: &str) -> Vec<u16> {
        name.encode_utf16().chain(Some(0)).collect()
    }

    pub(super) fn attach(
        name: &str,
        size: usize,
        config: &RegionConfig,
        create: bool,
    ) -> Result<SharedRegion> {
        let wide = to_wide(&platform_name(name)?);
        let unavailable = |source: io::Error| RegionError::Unavailable {
            name: name.to_string(),
            source,
        };
        let size64 = size as u64;

        let mut last_err = io::Error::from(io::ErrorKind::NotFound);
        for attempt in 0..=config.create_retries {
            if attempt > 0 {
                std::thread::sleep(config.retry_delay);
            }

            if create {
                let attrs = security_attributes(config.access, name);
                let sa = attrs.as_ref().map_or(std::ptr::null(), |a| a.as_ptr());
                // SAFETY: `wide` is NUL-terminated; `sa` is null or points to
                // attributes kept alive by `attrs` for the call.
                let handle = unsafe {
                    CreateFileMappingW(
                        INVALID_HANDLE_VALUE,
                        sa,
                        PAGE_READWRITE,
                        (size64 >> 32) as u32,
                        size64 as u32,
                        wide.as_ptr(),
                    )
                };
                // SAFETY: reads the calling thread's last-error value.
                let code = unsafe { GetLastError() };
                if !handle.is_null() {
                    let created = code != ERROR_ALREADY_EXISTS;
                    return map(name, handle, size, created).map_err(unavailable);
                }
                last_err = io::Error::from_raw_os_error(code as i32);
                if code != ERROR_ACCESS_DENIED {
                    continue;
                }
                debug!(name, "create denied; opening existing mapping");
            }

            // SAFETY: `wide` is NUL-terminated.
            let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wide.as_ptr()) };
            if handle.is_null() {
                last_err = io::Error::last_os_error();
                debug!(name, attempt, error = %last_err, "region not present yet");
                continue;
            }
            return map(name, handle, size, false).map_err(unavailable);
        }

        Err(unavailable(last_err))
    }

    fn map(name: &str, handle: HANDLE, size: usize, created: bool) -> io::Result<SharedRegion> {
        // SAFETY: `handle` is a valid file-mapping handle owned by this call.
        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, size) };
        let Some(ptr) = NonNull::new(view.Value.cast::<u8>()) else {
            let err = io::Error::last_os_error();
            // SAFETY: `handle` is open and not used after this point.
            unsafe { CloseHandle(handle) };
            return Err(err);
        };

        Ok(SharedRegion {
            name: name.to_string(),
            ptr,
            len: size,
            created,
            handle,
        })
    }

    pub(super) fn release(region: &mut SharedRegion) {
        // SAFETY: the view and handle were created in `map` and are released
        // exactly once, here.
        unsafe {
            UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: region.ptr.as_ptr().cast(),
            });
            CloseHandle(region.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn unique_name(tag: &str) -> String {
        format!(
            "/shmbridge-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        )
    }

    #[cfg(unix)]
    #[test]
    fn platform_name_normalizes_posix_names() {
        assert_eq!(platform_name("NeuralChromium_State").unwrap(), "/NeuralChromium_State");
        assert_eq!(platform_name("/already").unwrap(), "/already");
        assert_eq!(
            platform_name("Local\\NeuralChromium_Command_V1").unwrap(),
            "/NeuralChromium_Command_V1"
        );
        assert!(matches!(
            platform_name("a/b"),
            Err(RegionError::InvalidName { .. })
        ));
        assert!(platform_name("").is_err());
        assert!(platform_name("/").is_err());
        assert!(platform_name(&"x".repeat(300)).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn second_attach_sees_first_writes() {
        let name = unique_name("attach");
        let first = SharedRegion::open_or_create(&name, 4096).expect("create should succeed");
        assert!(first.created());
        assert_eq!(first.capacity(), 4096);

        let second = SharedRegion::open_or_create(&name, 4096).expect("attach should succeed");
        assert!(!second.created());

        first.write_at(100, b"frame").unwrap();
        let mut buf = [0u8; 5];
        second.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"frame");

        drop(first);
        drop(second);
        SharedRegion::unlink(&name).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn open_existing_fails_for_missing_region() {
        let name = unique_name("missing");
        let config = RegionConfig {
            create_retries: 1,
            retry_delay: Duration::from_millis(1),
            ..RegionConfig::default()
        };
        let err = SharedRegion::open_existing_with_config(&name, 64, &config).unwrap_err();
        assert!(matches!(err, RegionError::Unavailable { .. }));
        assert!(err.is_retryable());
    }

    #[cfg(unix)]
    #[test]
    fn created_region_is_relaxed_for_other_users() {
        use std::os::unix::fs::PermissionsExt;

        let name = unique_name("perms");
        let region = SharedRegion::open_or_create(&name, 64).unwrap();
        // Linux exposes POSIX shared memory under /dev/shm.
        let path = std::path::Path::new("/dev/shm").join(name.trim_start_matches('/'));
        if let Ok(meta) = std::fs::metadata(&path) {
            assert_eq!(meta.permissions().mode() & 0o777, crate::security::RELAXED_MODE);
        }
        drop(region);
        SharedRegion::unlink(&name).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn rejects_out_of_bounds_access() {
        let name = unique_name("bounds");
        let region = SharedRegion::open_or_create(&name, 32).unwrap();
        assert!(region.write_at(30, b"abc").is_err());
        assert!(region.read_vec(0, 32).is_ok());
        drop(region);
        SharedRegion::unlink(&name).unwrap();
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = SharedRegion::open_or_create("shmbridge-zero", 0).unwrap_err();
        assert!(matches!(err, RegionError::Unavailable { .. }));
    }
}
