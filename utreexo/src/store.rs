//! Backing stores for the dense forest.
//!
//! A store is a flat array of 32-byte hashes indexed by position. Reads past
//! the end return the empty hash; stores only ever grow.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use merkle::Hash;
use tracing::{debug, warn};

use super::error::UtreexoError;
use super::position::{detect_row, row_offset, Position};

const HASH_SIZE: u64 = 32;

/// Flat array of hashes backing a dense forest.
pub trait Store {
    /// Reads the hash at `pos`. Positions past the end read as empty.
    fn read(&self, pos: Position) -> Result<Hash, UtreexoError>;

    /// Writes the hash at `pos`, which must be below `size()`.
    fn write(&mut self, pos: Position, hash: Hash) -> Result<(), UtreexoError>;

    /// Number of slots.
    fn size(&self) -> u64;

    /// Grows the store to `size` slots, filling new slots with empty hashes.
    fn resize(&mut self, size: u64) -> Result<(), UtreexoError>;

    /// Flushes everything to durable storage.
    fn close(&mut self) -> Result<(), UtreexoError>;
}

/// In-memory store.
#[derive(Clone, Debug, Default)]
pub struct MemStore {
    data: Vec<Hash>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn read(&self, pos: Position) -> Result<Hash, UtreexoError> {
        Ok(self.data.get(pos as usize).copied().unwrap_or_default())
    }

    fn write(&mut self, pos: Position, hash: Hash) -> Result<(), UtreexoError> {
        match self.data.get_mut(pos as usize) {
            Some(slot) => {
                *slot = hash;
                Ok(())
            }
            None => Err(UtreexoError::PositionOutOfRange(pos)),
        }
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn resize(&mut self, size: u64) -> Result<(), UtreexoError> {
        if size > self.size() {
            self.data.resize(size as usize, Hash::empty());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), UtreexoError> {
        Ok(())
    }
}

/// Store backed by a single file of concatenated hashes.
#[derive(Debug)]
pub struct FileStore {
    file: File,
    size: u64,
}

impl FileStore {
    /// Opens the file at `path`, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, UtreexoError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path.as_ref())?;
        let size = file.metadata()?.len() / HASH_SIZE;
        debug!(path = %path.as_ref().display(), size, "opened forest file");
        Ok(FileStore { file, size })
    }
}

impl Store for FileStore {
    fn read(&self, pos: Position) -> Result<Hash, UtreexoError> {
        if pos >= self.size {
            return Ok(Hash::empty());
        }
        let mut buf = [0u8; 32];
        let mut file = &self.file;
        file.seek(SeekFrom::Start(pos * HASH_SIZE))?;
        file.read_exact(&mut buf)?;
        Ok(Hash::from(buf))
    }

    fn write(&mut self, pos: Position, hash: Hash) -> Result<(), UtreexoError> {
        if pos >= self.size {
            return Err(UtreexoError::PositionOutOfRange(pos));
        }
        self.file.seek(SeekFrom::Start(pos * HASH_SIZE))?;
        self.file.write_all(&hash)?;
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn resize(&mut self, size: u64) -> Result<(), UtreexoError> {
        if size > self.size {
            self.file.set_len(size * HASH_SIZE)?;
            self.size = size;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), UtreexoError> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Write-back cache over another store.
///
/// The rightmost `fraction` of every row is kept in memory: that is where
/// additions and deletion swaps concentrate. Entries that fall outside the
/// band after a resize are written back.
#[derive(Debug)]
pub struct CachedStore<S: Store> {
    inner: S,
    fraction: f64,
    cache: RefCell<HashMap<Position, (Hash, bool)>>,
}

impl<S: Store> CachedStore<S> {
    /// Wraps `inner`, caching `fraction` (clamped to `0..=1`) of every row.
    pub fn new(inner: S, fraction: f64) -> Self {
        CachedStore {
            inner,
            fraction: fraction.max(0.0).min(1.0),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Number of cached slots.
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn flush(&mut self, evict: impl Fn(Position) -> bool) -> Result<(), UtreexoError> {
        let mut cache = self.cache.borrow_mut();
        let leaving: Vec<Position> = cache.keys().copied().filter(|&p| evict(p)).collect();
        for pos in leaving {
            if let Some((hash, dirty)) = cache.remove(&pos) {
                if dirty {
                    self.inner.write(pos, hash)?;
                }
            }
        }
        Ok(())
    }
}

impl<S: Store> Store for CachedStore<S> {
    fn read(&self, pos: Position) -> Result<Hash, UtreexoError> {
        if let Some((hash, _)) = self.cache.borrow().get(&pos) {
            return Ok(*hash);
        }
        let hash = self.inner.read(pos)?;
        let size = self.inner.size();
        if pos < size && in_band(pos, size, self.fraction) {
            self.cache.borrow_mut().insert(pos, (hash, false));
        }
        Ok(hash)
    }

    fn write(&mut self, pos: Position, hash: Hash) -> Result<(), UtreexoError> {
        let size = self.inner.size();
        if pos >= size {
            return Err(UtreexoError::PositionOutOfRange(pos));
        }
        if in_band(pos, size, self.fraction) {
            self.cache.borrow_mut().insert(pos, (hash, true));
            Ok(())
        } else {
            self.cache.borrow_mut().remove(&pos);
            self.inner.write(pos, hash)
        }
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn resize(&mut self, size: u64) -> Result<(), UtreexoError> {
        self.inner.resize(size)?;
        let fraction = self.fraction;
        self.flush(|p| !in_band(p, size, fraction))
    }

    fn close(&mut self) -> Result<(), UtreexoError> {
        let entries = self.cached();
        self.flush(|_| true)?;
        debug!(entries, "flushed forest cache");
        self.inner.close()
    }
}

impl<S: Store> Drop for CachedStore<S> {
    fn drop(&mut self) {
        if let Err(e) = self.flush(|_| true) {
            warn!(error = %e, "could not flush forest cache");
        }
    }
}

/// Returns true if `pos` falls in the cached band of its row
/// in a store of `size` slots.
fn in_band(pos: Position, size: u64, fraction: f64) -> bool {
    if fraction <= 0.0 || pos >= size {
        return false;
    }
    let rows = rows_for_size(size);
    let row = detect_row(pos, rows);
    let row_len = 1u64 << (rows - row);
    let band = ((row_len as f64) * fraction).ceil() as u64;
    let index = pos - row_offset(row, rows);
    index + band.min(row_len) >= row_len
}

/// Number of rows of a forest occupying `size` slots, `size = (2 << rows) - 1`.
pub(crate) fn rows_for_size(size: u64) -> u8 {
    ((size + 1).trailing_zeros() as u8).saturating_sub(1)
}
