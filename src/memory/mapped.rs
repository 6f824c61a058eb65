//! Shared memory region implementation

use std::{
    ffi::CString,
    fs::OpenOptions,
    os::fd::OwnedFd,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};

use crate::{
    concurrent::{atomic_buffer::AtomicBuffer, bits::Index},
    error::{Result, TernError},
};

/// How a mapped region is backed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingType {
    /// A named file on disk, shareable by path with other processes
    FileBacked,
    /// An anonymous memfd, private to this process tree
    #[cfg(target_os = "linux")]
    MemFd,
}

/// A memory-mapped region, either created by this process or mapped from
/// a file another process (normally the driver) created.
#[derive(Debug)]
pub struct MappedFile {
    mmap: MmapMut,
    path: Option<PathBuf>,
    _owned_fd: Option<OwnedFd>,
    backing_type: BackingType,
}

impl MappedFile {
    /// Map an existing file read-write and shared.
    ///
    /// This is the client's normal path: the driver creates and sizes the
    /// CnC and log files, the client only maps them.
    pub fn map_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| TernError::from_io(e, &format!("Failed to open {}", path.display())))?;

        let len = file
            .metadata()
            .map_err(|e| TernError::from_io(e, "Failed to stat mapped file"))?
            .len() as usize;
        if len == 0 {
            return Err(TernError::memory(format!(
                "Refusing to map empty file {}",
                path.display()
            )));
        }

        let mmap = unsafe {
            MmapOptions::new()
                .len(len)
                .map_mut(&file)
                .map_err(|e| TernError::from_io(e, "Failed to create memory mapping"))?
        };

        Ok(Self {
            mmap,
            path: Some(path.to_path_buf()),
            _owned_fd: None,
            backing_type: BackingType::FileBacked,
        })
    }

    /// Create a file of the given size and map it.
    ///
    /// Used by in-process driver stands-in and tooling; the production
    /// driver performs the equivalent on its side.
    pub fn create_new(path: impl AsRef<Path>, size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| TernError::from_io(e, &format!("Failed to create {}", path.display())))?;

        file.set_len(size as u64)
            .map_err(|e| TernError::from_io(e, "Failed to set file size"))?;

        let mmap = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&file)
                .map_err(|e| TernError::from_io(e, "Failed to create memory mapping"))?
        };

        Ok(Self {
            mmap,
            path: Some(path.to_path_buf()),
            _owned_fd: None,
            backing_type: BackingType::FileBacked,
        })
    }

    /// Create an anonymous memfd-backed region
    #[cfg(target_os = "linux")]
    pub fn create_memfd(name: &str, size: usize) -> Result<Self> {
        let name_cstr = CString::new(name)
            .map_err(|_| TernError::invalid_parameter("name", "Name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| TernError::memory(format!("Failed to create memfd: {}", e)))?;

        ftruncate(&owned_fd, size as i64)
            .map_err(|e| TernError::memory(format!("Failed to set memfd size: {}", e)))?;

        let mmap = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&owned_fd)
                .map_err(|e| TernError::from_io(e, "Failed to create memory mapping"))?
        };

        Ok(Self {
            mmap,
            path: None,
            _owned_fd: Some(owned_fd),
            backing_type: BackingType::MemFd,
        })
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn backing_type(&self) -> BackingType {
        self.backing_type
    }

    /// View the whole mapping as an atomic buffer
    pub fn atomic_buffer(&self) -> AtomicBuffer {
        unsafe { AtomicBuffer::wrap(self.mmap.as_ptr() as *mut u8, self.mmap.len() as Index) }
    }

    /// View a sub-range of the mapping as an atomic buffer
    pub fn atomic_buffer_at(&self, offset: Index, length: Index) -> AtomicBuffer {
        self.atomic_buffer().view(offset, length)
    }

    /// Flush dirty pages to the backing storage
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| TernError::from_io(e, "Failed to flush memory mapping"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remap_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.dat");

        let created = MappedFile::create_new(&path, 4096).unwrap();
        created.atomic_buffer().put_i64(128, 0x5445524e);
        created.flush().unwrap();
        drop(created);

        let mapped = MappedFile::map_existing(&path).unwrap();
        assert_eq!(mapped.len(), 4096);
        assert_eq!(mapped.atomic_buffer().get_i64(128), 0x5445524e);
    }

    #[test]
    fn test_map_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = MappedFile::map_existing(dir.path().join("absent.dat")).unwrap_err();
        assert!(matches!(err, TernError::Io { .. }));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memfd_region() {
        let region = MappedFile::create_memfd("tern-test", 8192).unwrap();
        assert_eq!(region.len(), 8192);
        assert_eq!(region.backing_type(), BackingType::MemFd);
        region.atomic_buffer().put_i32(0, 7);
        assert_eq!(region.atomic_buffer().get_i32(0), 7);
    }
}
