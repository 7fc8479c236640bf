//! # Backing Stores
//!
//! The swap store reaches its device through these traits, standing in for
//! the kernel's VFS open/read/write on a raw disk.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Backing store errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No device with that name
    NoSuchDevice(String),
    /// Access outside the device
    OutOfBounds {
        /// Byte offset of the access
        offset: u64,
        /// Length of the access
        len: usize,
    },
    /// Underlying I/O failure
    Io(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchDevice(name) => write!(f, "no such device: {}", name),
            Self::OutOfBounds { offset, len } => {
                write!(f, "access of {} bytes at offset {} is out of bounds", len, offset)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

/// A byte-addressed device holding swapped pages
pub trait BackingStore: Send {
    /// Device size in bytes
    fn size(&self) -> u64;

    /// Fill `dest` from `offset`
    fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> Result<(), StoreError>;

    /// Write `src` at `offset`
    fn write_at(&mut self, offset: u64, src: &[u8]) -> Result<(), StoreError>;
}

/// Opens backing stores by device name
pub trait BackingStoreProvider: Send + Sync {
    /// Open the named device for reading and writing
    fn open(&self, name: &str) -> Result<Box<dyn BackingStore>, StoreError>;
}

fn check_bounds(size: u64, offset: u64, len: usize) -> Result<(), StoreError> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StoreError::OutOfBounds { offset, len }),
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Backing store kept in a heap buffer
#[derive(Debug, Clone)]
pub struct MemoryBackingStore {
    data: Vec<u8>,
}

impl MemoryBackingStore {
    /// Create a zeroed store of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }
}

impl BackingStore for MemoryBackingStore {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> Result<(), StoreError> {
        check_bounds(self.size(), offset, dest.len())?;
        let start = offset as usize;
        dest.copy_from_slice(&self.data[start..start + dest.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, src: &[u8]) -> Result<(), StoreError> {
        check_bounds(self.size(), offset, src.len())?;
        let start = offset as usize;
        self.data[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }
}

/// Provider handing out a fresh [`MemoryBackingStore`] for one device name
#[derive(Debug, Clone)]
pub struct MemoryStoreProvider {
    device: String,
    size: usize,
}

impl MemoryStoreProvider {
    /// Serve `device` as an in-memory store of `size` bytes
    pub fn new(device: &str, size: usize) -> Self {
        Self {
            device: String::from(device),
            size,
        }
    }
}

impl BackingStoreProvider for MemoryStoreProvider {
    fn open(&self, name: &str) -> Result<Box<dyn BackingStore>, StoreError> {
        if name != self.device {
            return Err(StoreError::NoSuchDevice(String::from(name)));
        }
        Ok(Box::new(MemoryBackingStore::new(self.size)))
    }
}

// =============================================================================
// File store
// =============================================================================

#[cfg(any(test, feature = "std"))]
pub use file::{FileBackingStore, FileStoreProvider};

#[cfg(any(test, feature = "std"))]
mod file {
    use super::{check_bounds, BackingStore, BackingStoreProvider, StoreError};
    use alloc::boxed::Box;
    use alloc::string::{String, ToString};
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::{Path, PathBuf};

    /// Backing store in a host file
    #[derive(Debug)]
    pub struct FileBackingStore {
        file: File,
        size: u64,
    }

    impl FileBackingStore {
        /// Create (or truncate) `path` and size it to `size` bytes
        pub fn create(path: &Path, size: u64) -> Result<Self, StoreError> {
            let file = File::options()
                .read(true)
                .write(true)
                .truncate(true)
                .create(true)
                .open(path)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            file.set_len(size)
                .map_err(|e| StoreError::Io(e.to_string()))?;
            Ok(Self { file, size })
        }
    }

    impl BackingStore for FileBackingStore {
        fn size(&self) -> u64 {
            self.size
        }

        fn read_at(&mut self, offset: u64, dest: &mut [u8]) -> Result<(), StoreError> {
            check_bounds(self.size, offset, dest.len())?;
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| StoreError::Io(e.to_string()))?;
            self.file
                .read_exact(dest)
                .map_err(|e| StoreError::Io(e.to_string()))
        }

        fn write_at(&mut self, offset: u64, src: &[u8]) -> Result<(), StoreError> {
            check_bounds(self.size, offset, src.len())?;
            self.file
                .seek(SeekFrom::Start(offset))
                .map_err(|e| StoreError::Io(e.to_string()))?;
            self.file
                .write_all(src)
                .map_err(|e| StoreError::Io(e.to_string()))
        }
    }

    /// Provider mapping one device name onto a host file
    #[derive(Debug, Clone)]
    pub struct FileStoreProvider {
        device: String,
        path: PathBuf,
        size: u64,
    }

    impl FileStoreProvider {
        /// Serve `device` from `path`, created with `size` bytes on open
        pub fn new(device: &str, path: impl Into<PathBuf>, size: u64) -> Self {
            Self {
                device: String::from(device),
                path: path.into(),
                size,
            }
        }
    }

    impl BackingStoreProvider for FileStoreProvider {
        fn open(&self, name: &str) -> Result<Box<dyn BackingStore>, StoreError> {
            if name != self.device {
                return Err(StoreError::NoSuchDevice(String::from(name)));
            }
            Ok(Box::new(FileBackingStore::create(&self.path, self.size)?))
        }
    }
}
