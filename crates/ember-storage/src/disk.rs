//! Disk manager - blocking page-granularity I/O
//!
//! Backs the buffer pool with a single database file. Pages live at
//! `page_id * PAGE_SIZE`; reads and writes are whole-page and synchronous.
//! Reading a page that was never written returns all zeroes, so freshly
//! allocated pages come back empty after a restart.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use ember_common::prelude::*;

use crate::PAGE_SIZE;

/// Disk manager for reading and writing pages.
pub struct DiskManager {
    /// Path to the database file
    db_path: PathBuf,
    /// File handle; `None` once the manager has been shut down
    file: Mutex<Option<File>>,
}

impl DiskManager {
    /// Create a new disk manager, creating the file if it doesn't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)
            .map_err(|e| {
                Error::Storage(StorageError::IoError(format!(
                    "Failed to open database file: {}",
                    e
                )))
            })?;

        Ok(Self {
            db_path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Read a page from disk into `buffer`.
    ///
    /// The buffer must be exactly `PAGE_SIZE` bytes. Reads past the end of
    /// the file zero-fill the buffer instead of failing.
    pub fn read_page(&self, page_id: PageId, buffer: &mut [u8]) -> Result<()> {
        let offset = Self::page_offset(page_id)?;
        Self::check_buffer(buffer.len())?;

        let mut guard = self.file.lock();
        let file = Self::open_file(&mut guard)?;

        let file_len = file
            .metadata()
            .map_err(|e| Error::Storage(StorageError::IoError(format!("Failed to stat: {}", e))))?
            .len();

        // Pages are written whole, so anything at or past EOF was never
        // written and reads as zeroes.
        if offset >= file_len {
            buffer.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::Storage(StorageError::IoError(format!("Failed to seek: {}", e))))?;

        file.read_exact(buffer)
            .map_err(|e| Error::Storage(StorageError::IoError(format!("Failed to read page: {}", e))))?;

        Ok(())
    }

    /// Write a page to disk.
    ///
    /// The buffer must be exactly `PAGE_SIZE` bytes.
    pub fn write_page(&self, page_id: PageId, buffer: &[u8]) -> Result<()> {
        let offset = Self::page_offset(page_id)?;
        Self::check_buffer(buffer.len())?;

        let mut guard = self.file.lock();
        let file = Self::open_file(&mut guard)?;

        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::Storage(StorageError::IoError(format!("Failed to seek: {}", e))))?;

        file.write_all(buffer)
            .map_err(|e| Error::Storage(StorageError::IoError(format!("Failed to write page: {}", e))))?;

        Ok(())
    }

    /// Sync the database file to durable storage.
    pub fn sync(&self) -> Result<()> {
        let mut guard = self.file.lock();
        let file = Self::open_file(&mut guard)?;
        file.sync_all()
            .map_err(|e| Error::Storage(StorageError::IoError(format!("Failed to sync: {}", e))))
    }

    /// Close the backing file. Subsequent reads and writes fail.
    pub fn shutdown(&self) {
        let mut guard = self.file.lock();
        if let Some(file) = guard.take() {
            let _ = file.sync_all();
        }
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Number of whole pages currently stored in the file.
    pub fn num_pages(&self) -> Result<u64> {
        let mut guard = self.file.lock();
        let file = Self::open_file(&mut guard)?;
        let len = file
            .metadata()
            .map_err(|e| Error::Storage(StorageError::IoError(format!("Failed to stat: {}", e))))?
            .len();
        Ok(len / PAGE_SIZE as u64)
    }

    fn page_offset(page_id: PageId) -> Result<u64> {
        if !page_id.is_valid() {
            return Err(Error::Storage(StorageError::InvalidPage(format!(
                "cannot address {}",
                page_id
            ))));
        }
        Ok(page_id.0 as u64 * PAGE_SIZE as u64)
    }

    fn check_buffer(len: usize) -> Result<()> {
        if len != PAGE_SIZE {
            return Err(Error::Storage(StorageError::InvalidPage(format!(
                "buffer size {} does not match PAGE_SIZE {}",
                len, PAGE_SIZE
            ))));
        }
        Ok(())
    }

    fn open_file(guard: &mut Option<File>) -> Result<&mut File> {
        guard.as_mut().ok_or_else(|| {
            Error::Storage(StorageError::IoError("disk manager is shut down".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_disk_manager_new() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let dm = DiskManager::new(&db_path).unwrap();
        assert!(dm.path().exists());
        assert_eq!(dm.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_read_write_round_trip() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::new(dir.path().join("test.db")).unwrap();

        let mut write_buf = vec![0u8; PAGE_SIZE];
        write_buf[0..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        write_buf[PAGE_SIZE - 4..].copy_from_slice(&[0xCA, 0xFE, 0xBA, 0xBE]);

        dm.write_page(PageId(3), &write_buf).unwrap();
        dm.sync().unwrap();

        let mut read_buf = vec![0u8; PAGE_SIZE];
        dm.read_page(PageId(3), &mut read_buf).unwrap();

        assert_eq!(&read_buf[0..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&read_buf[PAGE_SIZE - 4..], &[0xCA, 0xFE, 0xBA, 0xBE]);
    }

    #[test]
    fn test_read_past_end_zero_fills() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::new(dir.path().join("test.db")).unwrap();

        let mut buf = vec![0xAAu8; PAGE_SIZE];
        dm.read_page(PageId(99), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::new(dir.path().join("test.db")).unwrap();

        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(dm.read_page(PageId::INVALID, &mut buf).is_err());
        assert!(dm.write_page(PageId(-5), &buf).is_err());
    }

    #[test]
    fn test_wrong_buffer_size_rejected() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::new(dir.path().join("test.db")).unwrap();

        let mut small = vec![0u8; PAGE_SIZE / 2];
        assert!(dm.read_page(PageId(0), &mut small).is_err());
        assert!(dm.write_page(PageId(0), &small).is_err());
    }

    #[test]
    fn test_shutdown_fails_io() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::new(dir.path().join("test.db")).unwrap();

        dm.shutdown();

        let mut buf = vec![0u8; PAGE_SIZE];
        assert!(dm.read_page(PageId(0), &mut buf).is_err());
        assert!(dm.write_page(PageId(0), &buf).is_err());
        assert!(dm.sync().is_err());
    }

    #[test]
    fn test_persistence_across_managers() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        {
            let dm = DiskManager::new(&db_path).unwrap();
            let mut buf = vec![0u8; PAGE_SIZE];
            buf[0..8].copy_from_slice(b"PERSIST!");
            dm.write_page(PageId(0), &buf).unwrap();
            dm.sync().unwrap();
            dm.shutdown();
        }

        {
            let dm = DiskManager::new(&db_path).unwrap();
            let mut buf = vec![0u8; PAGE_SIZE];
            dm.read_page(PageId(0), &mut buf).unwrap();
            assert_eq!(&buf[0..8], b"PERSIST!");
        }
    }
}
