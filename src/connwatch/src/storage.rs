//! Byte-addressable durable storage.
//!
//! Models the EEPROM-style backing store of the device: a fixed-size byte
//! image that is read and written at absolute offsets and only becomes
//! durable after [`DurableStorage::commit`]. Fresh storage reads back as
//! `0xFF`, which every region layout treats as "uninitialized".
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

/// Value of an erased byte.
pub const ERASED: u8 = 0xFF;

/// Default image size: config region plus a comfortably sized history region.
pub const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("access of {len} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
}

/// Backing store shared by the config and history regions.
pub trait DurableStorage: Send + Sync {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&self, offset: usize, data: &[u8]) -> Result<(), StorageError>;
    /// Flushes pending writes to the durable medium.
    fn commit(&self) -> Result<(), StorageError>;
    fn capacity(&self) -> usize;
}

fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// Volatile storage, used by tests and simulation runs.
#[derive(Debug)]
pub struct MemoryStorage {
    bytes: Mutex<Vec<u8>>,
    commits: Mutex<u64>,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Mutex::new(vec![ERASED; capacity]),
            commits: Mutex::new(0),
        }
    }

    /// Number of commits performed so far.
    pub fn commits(&self) -> u64 {
        *self.commits.lock()
    }

    /// Copy of the current image.
    pub fn image(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DurableStorage for MemoryStorage {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let bytes = self.bytes.lock();
        check_bounds(offset, buf.len(), bytes.len())?;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let mut bytes = self.bytes.lock();
        check_bounds(offset, data.len(), bytes.len())?;
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        *self.commits.lock() += 1;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.lock().len()
    }
}

/// Storage image kept in memory and written back to a file on commit.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    image: Mutex<Vec<u8>>,
}

impl FileStorage {
    /// Opens `path`, creating an erased image of `capacity` bytes when the
    /// file does not exist yet. A shorter existing file is padded with
    /// erased bytes.
    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut image = Vec::with_capacity(capacity);
        match File::open(&path) {
            Ok(mut file) => {
                file.read_to_end(&mut image)?;
                image.truncate(capacity);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        image.resize(capacity, ERASED);
        tracing::debug!(path = %path.display(), capacity, "opened storage image");
        Ok(Self {
            path,
            image: Mutex::new(image),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DurableStorage for FileStorage {
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let image = self.image.lock();
        check_bounds(offset, buf.len(), image.len())?;
        buf.copy_from_slice(&image[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let mut image = self.image.lock();
        check_bounds(offset, data.len(), image.len())?;
        image[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn commit(&self) -> Result<(), StorageError> {
        let image = self.image.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&image)?;
        file.set_len(image.len() as u64)?;
        file.sync_data()?;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.image.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_memory_reads_erased() {
        let storage = MemoryStorage::new(16);
        let mut buf = [0u8; 4];
        storage.read(12, &mut buf).unwrap();
        assert_eq!(buf, [ERASED; 4]);
    }

    #[test]
    fn rejects_out_of_bounds() {
        let storage = MemoryStorage::new(8);
        let err = storage.write(6, &[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            StorageError::OutOfBounds {
                offset: 6,
                len: 3,
                capacity: 8
            }
        ));
    }

    #[test]
    fn file_storage_persists_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        {
            let storage = FileStorage::open(&path, 64).unwrap();
            storage.write(10, &[7, 8, 9]).unwrap();
            storage.commit().unwrap();
        }
        let storage = FileStorage::open(&path, 64).unwrap();
        let mut buf = [0u8; 4];
        storage.read(9, &mut buf).unwrap();
        assert_eq!(buf, [ERASED, 7, 8, 9]);
    }

    #[test]
    fn uncommitted_writes_are_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        {
            let storage = FileStorage::open(&path, 32).unwrap();
            storage.write(0, &[1]).unwrap();
        }
        let storage = FileStorage::open(&path, 32).unwrap();
        let mut buf = [0u8; 1];
        storage.read(0, &mut buf).unwrap();
        assert_eq!(buf, [ERASED]);
    }
}
