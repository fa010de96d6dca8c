//! Single-instance guard
//!
//! On Linux the lock is an abstract unix socket named `<name>_lockfile`:
//! binding fails while another process holds it, and the kernel releases it
//! when the holder exits.

use std::io;

/// Held for the lifetime of the process; dropping it releases the lock
#[derive(Debug)]
pub struct InstanceLock {
    name: String,
    #[cfg(target_os = "linux")]
    _socket: std::os::unix::net::UnixListener,
}

impl InstanceLock {
    /// Try to become the single running instance called `name`
    #[cfg(target_os = "linux")]
    pub fn acquire(name: &str) -> io::Result<Self> {
        use std::os::linux::net::SocketAddrExt;
        use std::os::unix::net::{SocketAddr, UnixListener};

        let lock_name = format!("{}_lockfile", name);
        let addr = SocketAddr::from_abstract_name(lock_name.as_bytes())?;
        let socket = UnixListener::bind_addr(&addr)?;

        tracing::debug!("Instance lock acquired: @{}", lock_name);
        Ok(Self {
            name: name.to_string(),
            _socket: socket,
        })
    }

    /// Locking is only implemented on Linux; elsewhere this always succeeds
    #[cfg(not(target_os = "linux"))]
    pub fn acquire(name: &str) -> io::Result<Self> {
        tracing::debug!("Instance lock not supported on this platform");
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(all(test, target_os = "linux"))]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let name = format!("nibesrv-test-{}", std::process::id());
        let first = InstanceLock::acquire(&name).unwrap();
        assert_eq!(first.name(), name);
        assert!(InstanceLock::acquire(&name).is_err());

        drop(first);
        assert!(InstanceLock::acquire(&name).is_ok());
    }
}
