// MIT License - Copyright (c) 2026 Peter Wright
// Single-byte persistent status stores

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::StorageError;

/// Persistent backing for the alarm status byte.
///
/// Loads happen once at startup, stores only when the status actually
/// changes, always from the main context; implementations can be plain
/// synchronous I/O.
pub trait StatusStore {
    /// Read the persisted byte, `None` when nothing was ever stored.
    fn load(&mut self) -> Result<Option<u8>, StorageError>;

    /// Persist one byte.
    fn store(&mut self, byte: u8) -> Result<(), StorageError>;
}

/// Status byte in a one-byte file, the host-side analogue of the EEPROM
/// cell the panel firmware would use.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StatusStore for FileStore {
    fn load(&mut self) -> Result<Option<u8>, StorageError> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e)),
        };
        let mut byte = [0u8; 1];
        match file.read_exact(&mut byte) {
            Ok(()) => Ok(Some(byte[0])),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn store(&mut self, byte: u8) -> Result<(), StorageError> {
        std::fs::write(&self.path, [byte]).map_err(StorageError::Io)
    }
}

/// In-memory store for hosts that persist elsewhere, and for tests. Clones
/// share the same cell, so a clone kept aside can observe what the engine
/// wrote.
#[derive(Clone, Default)]
pub struct MemoryStore {
    cell: Arc<Mutex<Option<u8>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(byte: u8) -> Self {
        Self {
            cell: Arc::new(Mutex::new(Some(byte))),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Currently stored byte.
    pub fn value(&self) -> Option<u8> {
        *self.cell.lock().unwrap()
    }

    /// Number of store operations performed, for wear accounting.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl StatusStore for MemoryStore {
    fn load(&mut self) -> Result<Option<u8>, StorageError> {
        Ok(*self.cell.lock().unwrap())
    }

    fn store(&mut self, byte: u8) -> Result<(), StorageError> {
        *self.cell.lock().unwrap() = Some(byte);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
