//! The storage window: a single memory-mapped file backing the whole
//! image. All region types in [`crate::layout`] are interpreted as byte
//! ranges inside this one mapping.

use crate::core::error::{Error, LayoutError, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// A memory-mapped image file.
///
/// Reads go through plain slicing (`&[u8]`), which is safe as long as the
/// caller only reads bytes some writer has already published (the
/// superblock/branch-table/delta-log discipline in this crate guarantees
/// that). Writes use raw pointer copies through an interior-mutable view of
/// the mapping: every writer is handed a disjoint byte range by the
/// allocator before it writes, so concurrent writers never race on the same
/// bytes, and `&self` is enough to write without serializing all writers
/// behind a single lock.
pub struct StorageWindow {
    mmap: MmapMut,
    #[allow(dead_code)]
    file: File,
}

impl StorageWindow {
    /// Open (and create if needed) an image file, sized to `total_size`
    /// bytes, and map it.
    pub fn open(path: &Path, total_size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(total_size)?;
        let mmap = unsafe { MmapOptions::new().len(total_size as usize).map_mut(&file)? };
        Ok(Self { mmap, file })
    }

    /// Total size of the mapped region.
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn check_bounds(&self, offset: u64, len: u64) -> Result<()> {
        if offset.saturating_add(len) > self.len() {
            return Err(Error::Layout(LayoutError::OutOfBounds {
                offset,
                len,
                region_size: self.len(),
            }));
        }
        Ok(())
    }

    /// Read `len` bytes at `offset`. Callers must only request bytes
    /// already published by some writer (see struct docs).
    pub fn read(&self, offset: u64, len: u64) -> Result<&[u8]> {
        self.check_bounds(offset, len)?;
        Ok(&self.mmap[offset as usize..(offset + len) as usize])
    }

    /// Write `data` at `offset`.
    ///
    /// # Safety contract
    /// The caller must own exclusive write access to `[offset, offset +
    /// data.len())` — i.e. the range must have come from the allocator and
    /// no other writer may touch it concurrently. This method takes `&self`
    /// (not `&mut self`) so concurrent writers touching disjoint, allocator
    /// issued ranges never block on one another.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_bounds(offset, data.len() as u64)?;
        unsafe {
            let dst = self.mmap.as_ptr().add(offset as usize) as *mut u8;
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// Zero `len` bytes at `offset`. Same exclusivity contract as [`Self::write`].
    pub fn zero(&self, offset: u64, len: u64) -> Result<()> {
        self.check_bounds(offset, len)?;
        unsafe {
            let dst = self.mmap.as_ptr().add(offset as usize) as *mut u8;
            std::ptr::write_bytes(dst, 0, len as usize);
        }
        Ok(())
    }

    /// Flush the mapping to the backing file.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}

// Safety: every write goes through an allocator-issued, disjoint byte
// range (see `write`/`zero` docs); there is no shared mutable state beyond
// the raw bytes themselves.
unsafe impl Sync for StorageWindow {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.daxfs");
        let window = StorageWindow::open(&path, 4096).unwrap();
        window.write(100, b"hello").unwrap();
        assert_eq!(window.read(100, 5).unwrap(), b"hello");
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.daxfs");
        let window = StorageWindow::open(&path, 4096).unwrap();
        assert!(window.read(4090, 100).is_err());
        assert!(window.write(4090, &[0u8; 100]).is_err());
    }
}
