//! Firmware staging memory
//!
//! A fixed region `[base_address, base_address + size)` inside a backing file
//! or partition device. Writes are appended at a running cursor; the backing
//! store itself is provisioned outside this program and never created here.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::MemoryConfig;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Backing store {path} unavailable: {source}")]
    Backing { path: PathBuf, source: io::Error },

    #[error("Backing store {path} holds {actual} bytes, region needs {required}")]
    BackingTooSmall {
        path: PathBuf,
        required: u64,
        actual: u64,
    },

    #[error("Address offset 0x{offset:X} outside region of {size} bytes")]
    InvalidAddress { offset: u64, size: u64 },

    #[error("Insufficient memory: {requested} bytes requested, {available} available")]
    InsufficientMemory { requested: u64, available: u64 },

    #[error("Failed to read binary {path}: {source}")]
    ReadBinary { path: PathBuf, source: io::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

struct Region {
    file: File,
    /// Next write offset, relative to the region base
    cursor: u64,
}

/// Address-addressable backing store for firmware images
pub struct MemoryStore {
    path: PathBuf,
    base_address: u64,
    size: u64,
    region: Mutex<Region>,
}

impl MemoryStore {
    /// Open the backing store for reading and writing.
    ///
    /// The store must already span the whole region; its length is taken by
    /// seeking to the end so partition devices are measured too.
    pub fn open(config: &MemoryConfig) -> Result<Self, MemoryError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.backing_path)
            .map_err(|source| MemoryError::Backing {
                path: config.backing_path.clone(),
                source,
            })?;

        let actual = file
            .seek(SeekFrom::End(0))
            .map_err(|source| MemoryError::Backing {
                path: config.backing_path.clone(),
                source,
            })?;
        let required = config.base_address.checked_add(config.size);
        if required.map_or(true, |required| actual < required) {
            return Err(MemoryError::BackingTooSmall {
                path: config.backing_path.clone(),
                required: required.unwrap_or(u64::MAX),
                actual,
            });
        }

        info!(
            path = %config.backing_path.display(),
            base_address = format!("0x{:X}", config.base_address),
            size = config.size,
            "Memory region opened"
        );

        Ok(Self {
            path: config.backing_path.clone(),
            base_address: config.base_address,
            size: config.size,
            region: Mutex::new(Region { file, cursor: 0 }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current write offset relative to the region base
    pub fn cursor(&self) -> u64 {
        self.region.lock().cursor
    }

    /// Move the write cursor, e.g. to the address announced by RequestDownload
    pub fn set_cursor(&self, offset: u64) -> Result<(), MemoryError> {
        if offset >= self.size {
            return Err(MemoryError::InvalidAddress {
                offset,
                size: self.size,
            });
        }
        self.region.lock().cursor = offset;
        Ok(())
    }

    /// Whether `len` bytes fit between `offset` and the end of the region
    pub fn fits(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size)
    }

    /// Write `data` at the cursor and advance it.
    ///
    /// Returns the region offset the data landed at.
    pub fn write_to_address(&self, data: &[u8]) -> Result<u64, MemoryError> {
        let mut region = self.region.lock();
        let offset = region.cursor;

        if offset >= self.size {
            warn!(offset, size = self.size, "Write cursor outside memory region");
            return Err(MemoryError::InvalidAddress {
                offset,
                size: self.size,
            });
        }

        let requested = data.len() as u64;
        let available = self.size - offset;
        if requested > available {
            warn!(requested, available, "Not enough memory left in region");
            return Err(MemoryError::InsufficientMemory {
                requested,
                available,
            });
        }

        region
            .file
            .seek(SeekFrom::Start(self.base_address + offset))?;
        region.file.write_all(data)?;
        region.file.flush()?;
        region.cursor = offset + requested;

        debug!(
            address = format!("0x{:X}", self.base_address + offset),
            bytes = requested,
            "Wrote chunk to memory"
        );
        Ok(offset)
    }

    /// Read `len` bytes starting at a region offset
    pub fn read_region(&self, offset: u64, len: u64) -> Result<Vec<u8>, MemoryError> {
        if !self.fits(offset, len) {
            return Err(MemoryError::InvalidAddress {
                offset,
                size: self.size,
            });
        }

        let mut region = self.region.lock();
        region
            .file
            .seek(SeekFrom::Start(self.base_address + offset))?;
        let mut buffer = vec![0u8; len as usize];
        region.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Read a complete binary file into memory
    pub fn read_binary(path: impl AsRef<Path>) -> Result<Vec<u8>, MemoryError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| MemoryError::ReadBinary {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), bytes = data.len(), "Read binary");
        Ok(data)
    }
}
