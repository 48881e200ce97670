//! The named cross-process advisory-lock collaborator, used only for
//! publisher/subscriber slot-claim arbitration in `directory.rs`.
//!
//! Opens a file under the OS temp directory and takes a whole-file
//! `flock(2)` lock on it rather than an `fcntl` byte-range lock —
//! functionally equivalent for a single-purpose lock file (one name,
//! one lock), and it gets "released automatically when the owning
//! process exits abnormally" for free: `flock` locks are owned by an
//! open file description, so the kernel drops them when every fd
//! referencing that description closes, including on process crash.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// A held advisory lock on a named file. Dropping it releases the lock.
pub struct NamedLock {
    _file: File,
}

impl NamedLock {
    /// Attempt to claim the named lock without blocking. Returns `Ok(None)`
    /// if another process already holds it (this is the expected,
    /// non-error outcome a directory scan probes for), and `Err` only on
    /// genuine I/O failure.
    ///
    /// Returns an RAII guard so unlock-on-drop is structural rather than
    /// a caller obligation.
    pub fn try_claim(name: &str) -> Result<Option<NamedLock>> {
        let path = lock_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::shm_open(format!("open lock {path:?}: {e}")))?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(NamedLock { _file: file }));
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EWOULDBLOCK) => Ok(None),
            _ => Err(Error::shm_open(format!("flock {path:?}: {err}"))),
        }
    }
}

// `File`'s `Drop` closes the descriptor, which releases the `flock`
// advisory lock held on it.

fn lock_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{name}.lock"))
}
