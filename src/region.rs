//! The named-shared-memory collaborator: create/open a named region of
//! a requested size, map it at a stable address within the calling
//! process, and release it on drop.
//!
//! Built on `memmap2` rather than raw `libc::mmap` calls, matching the
//! rest of the crate's preference for a safe wrapper over hand-rolled
//! unsafe mmap plumbing.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use memmap2::MmapMut;

use crate::error::{Error, Result};

/// A memory-mapped region backed by a named file in the OS temp
/// directory, shared between every process that opens the same name.
pub struct MappedRegion {
    mmap: MmapMut,
    // Keeping the file handle alive is required: dropping it would not
    // unmap the region (the mapping owns its own reference via the fd
    // duplicated into the kernel's mapping table), but holding it here
    // documents the ownership intent.
    _file: File,
    size: usize,
}

impl MappedRegion {
    /// Create the region if it doesn't exist (sized to at least
    /// `min_size` bytes), or open it if it does.
    pub fn open_or_create(name: &str, min_size: usize) -> Result<Self> {
        let path = region_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::shm_open(format!("open {path:?}: {e}")))?;

        let current_len = file
            .metadata()
            .map_err(|e| Error::shm_open(format!("stat {path:?}: {e}")))?
            .len() as usize;

        let size = current_len.max(min_size);
        if current_len < size {
            file.set_len(size as u64)
                .map_err(|e| Error::shm_open(format!("set_len {path:?}: {e}")))?;
        }

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| Error::shm_open(format!("mmap {path:?}: {e}")))?
        };

        Ok(Self { mmap, _file: file, size })
    }

    /// Open an existing region. Fails if the file doesn't exist yet —
    /// callers that need to wait for a producer to create it should
    /// retry (the `BufferHeader` init handshake in `buffer.rs` does
    /// exactly that).
    pub fn open(name: &str) -> Result<Self> {
        let path = region_path(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::shm_open(format!("open {path:?}: {e}")))?;

        let size = file
            .metadata()
            .map_err(|e| Error::shm_open(format!("stat {path:?}: {e}")))?
            .len() as usize;

        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|e| Error::shm_open(format!("mmap {path:?}: {e}")))?
        };

        Ok(Self { mmap, _file: file, size })
    }

    /// Stable base address of the mapped region within this process.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    /// Size in bytes of the mapped region.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

fn region_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}

// `MmapMut`'s `Drop` unmaps the region; `File`'s `Drop` closes the
// descriptor. Nothing else to release here.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_open_share_bytes() {
        let name = format!("tempo-ipc-test-region-{}", std::process::id());
        let _ = std::fs::remove_file(region_path(&name));

        let mut writer = MappedRegion::open_or_create(&name, 4096).unwrap();
        unsafe {
            std::ptr::write(writer.base_ptr() as *mut u64, 0xDEAD_BEEFu64);
        }

        let reader = MappedRegion::open(&name).unwrap();
        let value = unsafe { std::ptr::read(reader.base_ptr() as *const u64) };
        assert_eq!(value, 0xDEAD_BEEF);
        assert_eq!(reader.size(), 4096);

        drop(writer);
        drop(reader);
        let _ = std::fs::remove_file(region_path(&name));
    }

    #[test]
    fn test_open_or_create_grows_undersized_existing_file() {
        let name = format!("tempo-ipc-test-region-grow-{}", std::process::id());
        let _ = std::fs::remove_file(region_path(&name));

        {
            let _small = MappedRegion::open_or_create(&name, 64).unwrap();
        }
        let grown = MappedRegion::open_or_create(&name, 8192).unwrap();
        assert_eq!(grown.size(), 8192);

        drop(grown);
        let _ = std::fs::remove_file(region_path(&name));
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let name = format!("tempo-ipc-test-region-missing-{}", std::process::id());
        let _ = std::fs::remove_file(region_path(&name));
        assert!(MappedRegion::open(&name).is_err());
    }
}
