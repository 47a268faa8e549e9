//! Cross-privilege access for the named objects this crate creates.
//!
//! A sandboxed GPU or renderer process runs at a lower integrity level (or
//! under a tighter umask) than the agent that reads its frames. Default
//! object security keeps those two apart. The relaxed policy opens exactly the
//! one object being created, never anything broader, and a failure to build
//! it only degrades to default security, which still works between processes
//! of the same level.

#[cfg(unix)]
use tracing::{debug, warn};

#[cfg(unix)]
use crate::error::RegionError;
use crate::error::Result;

/// How a newly created region or event is exposed to other processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Grant read/write to every integrity level and user class.
    #[default]
    Relaxed,
    /// Keep the platform's default security for new objects.
    Inherit,
}

impl AccessPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessPolicy::Relaxed => "relaxed",
            AccessPolicy::Inherit => "inherit",
        }
    }
}

/// File mode applied to created POSIX objects under the relaxed policy.
pub const RELAXED_MODE: u32 = 0o666;

/// SDDL for the relaxed descriptor: generic-all for Everyone, and a
/// low mandatory label with no-write-up so low integrity writers are allowed.
#[cfg(windows)]
const RELAXED_SDDL: &str = "D:(A;;GA;;;WD)S:(ML;;NW;;;LW)";

/// Check whether the relaxed descriptor can be built on this host.
pub fn probe_relaxed() -> Result<()> {
    #[cfg(windows)]
    {
        windows::build_descriptor().map(drop)
    }

    #[cfg(not(windows))]
    {
        Ok(())
    }
}

/// Apply the policy to a freshly created POSIX object.
///
/// Failure is logged and swallowed; the object keeps its creation mode.
#[cfg(unix)]
pub(crate) fn relax_fd(policy: AccessPolicy, fd: libc::c_int, name: &str) {
    if policy == AccessPolicy::Inherit {
        return;
    }

    // SAFETY: `fd` is an open descriptor owned by the caller for the duration
    // of this call.
    let rc = unsafe { libc::fchmod(fd, RELAXED_MODE as libc::mode_t) };
    if rc == 0 {
        debug!(name, mode = format_args!("{RELAXED_MODE:o}"), "relaxed region permissions");
    } else {
        let err = RegionError::Security(std::io::Error::last_os_error());
        warn!(name, error = %err, "security descriptor unavailable; using default ACL");
    }
}

#[cfg(windows)]
pub(crate) use windows::security_attributes;

#[cfg(windows)]
mod windows {
    use std::ffi::c_void;

    use tracing::{debug, warn};
    use windows_sys::Win32::Foundation::LocalFree;
    use windows_sys::Win32::Security::Authorization::{
        ConvertStringSecurityDescriptorToSecurityDescriptorW, SDDL_REVISION_1,
    };
    use windows_sys::Win32::Security::{
        InitializeSecurityDescriptor, SetSecurityDescriptorDacl, PSECURITY_DESCRIPTOR,
        SECURITY_ATTRIBUTES, SECURITY_DESCRIPTOR,
    };

    use super::{AccessPolicy, RELAXED_SDDL};
    use crate::error::{RegionError, Result};

    const SECURITY_DESCRIPTOR_REVISION: u32 = 1;

    pub(crate) enum Descriptor {
        /// Allocated by the SDDL converter; released with `LocalFree`.
        Sddl(PSECURITY_DESCRIPTOR),
        /// Absolute descriptor with a NULL DACL.
        NullDacl(Box<SECURITY_DESCRIPTOR>),
    }

    impl Descriptor {
        fn as_ptr(&self) -> *mut c_void {
            match self {
                Descriptor::Sddl(ptr) => *ptr,
                Descriptor::NullDacl(sd) => (&**sd as *const SECURITY_DESCRIPTOR).cast_mut().cast(),
            }
        }
    }

    impl Drop for Descriptor {
        fn drop(&mut self) {
            if let Descriptor::Sddl(ptr) = self {
                // SAFETY: the pointer was allocated by
                // ConvertStringSecurityDescriptorToSecurityDescriptorW and is
                // released exactly once here.
                unsafe {
                    LocalFree(*ptr);
                }
            }
        }
    }

    /// Security attributes that keep their descriptor alive.
    pub(crate) struct SecurityAttributes {
        _descriptor: Descriptor,
        attrs: SECURITY_ATTRIBUTES,
    }

    impl SecurityAttributes {
        pub(crate) fn as_ptr(&self) -> *const SECURITY_ATTRIBUTES {
            &self.attrs
        }
    }

    pub(crate) fn build_descriptor() -> Result<Descriptor> {
        match sddl_descriptor() {
            Ok(descriptor) => Ok(descriptor),
            Err(err) => {
                debug!(error = %err, "SDDL descriptor failed; trying NULL DACL");
                null_dacl_descriptor()
            }
        }
    }

    fn sddl_descriptor() -> Result<Descriptor> {
        let sddl: Vec<u16> = RELAXED_SDDL.encode_utf16().chain(Some(0)).collect();
        let mut descriptor: PSECURITY_DESCRIPTOR = std::ptr::null_mut();
        // SAFETY: `sddl` is NUL-terminated UTF-16 and `descriptor` is a valid
        // out-pointer; the size out-parameter is optional.
        let ok = unsafe {
            ConvertStringSecurityDescriptorToSecurityDescriptorW(
                sddl.as_ptr(),
                SDDL_REVISION_1,
                &mut descriptor,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 || descriptor.is_null() {
            return Err(RegionError::Security(std::io::Error::last_os_error()));
        }
        Ok(Descriptor::Sddl(descriptor))
    }

    fn null_dacl_descriptor() -> Result<Descriptor> {
        // SAFETY: SECURITY_DESCRIPTOR is plain data; all-zero is a valid
        // starting state that InitializeSecurityDescriptor overwrites.
        let mut sd: Box<SECURITY_DESCRIPTOR> = Box::new(unsafe { std::mem::zeroed() });
        let ptr: PSECURITY_DESCRIPTOR = (&mut *sd as *mut SECURITY_DESCRIPTOR).cast();

        // SAFETY: `ptr` points to a live, writable SECURITY_DESCRIPTOR.
        if unsafe { InitializeSecurityDescriptor(ptr, SECURITY_DESCRIPTOR_REVISION) } == 0 {
            return Err(RegionError::Security(std::io::Error::last_os_error()));
        }
        // SAFETY: as above; a null DACL pointer with `present = TRUE` means
        // "allow everyone".
        if unsafe { SetSecurityDescriptorDacl(ptr, 1, std::ptr::null(), 0) } == 0 {
            return Err(RegionError::Security(std::io::Error::last_os_error()));
        }
        Ok(Descriptor::NullDacl(sd))
    }

    /// Build creation attributes for `name`, or `None` for default security.
    pub(crate) fn security_attributes(
        policy: AccessPolicy,
        name: &str,
    ) -> Option<SecurityAttributes> {
        if policy == AccessPolicy::Inherit {
            return None;
        }

        match build_descriptor() {
            Ok(descriptor) => {
                let attrs = SECURITY_ATTRIBUTES {
                    nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
                    lpSecurityDescriptor: descriptor.as_ptr(),
                    bInheritHandle: 0,
                };
                debug!(name, "built relaxed security descriptor");
                Some(SecurityAttributes {
                    _descriptor: descriptor,
                    attrs,
                })
            }
            Err(err) => {
                warn!(name, error = %err, "security descriptor unavailable; using default ACL");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relaxed_is_default() {
        assert_eq!(AccessPolicy::default(), AccessPolicy::Relaxed);
        assert_eq!(AccessPolicy::Inherit.as_str(), "inherit");
    }

    #[test]
    fn probe_succeeds_on_supported_hosts() {
        assert!(probe_relaxed().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn relax_fd_sets_world_read_write() {
        use std::os::fd::AsRawFd;
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("shmbridge-relax-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        relax_fd(AccessPolicy::Relaxed, file.as_raw_fd(), "test");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, RELAXED_MODE);

        relax_fd(AccessPolicy::Inherit, file.as_raw_fd(), "test");
        drop(file);
        let _ = std::fs::remove_file(&path);
    }

    #[cfg(windows)]
    #[test]
    fn relaxed_attributes_carry_a_descriptor() {
        let attrs = security_attributes(AccessPolicy::Relaxed, "test")
            .expect("relaxed descriptor should build");
        // SAFETY: `attrs` owns the structure for the duration of the read.
        let raw = unsafe { &*attrs.as_ptr() };
        assert!(!raw.lpSecurityDescriptor.is_null());
        assert!(security_attributes(AccessPolicy::Inherit, "test").is_none());
    }
}
