//! Disk manager for page-level file I/O.

use orchard_common::config::DiskManagerConfig;
use orchard_common::{OrchardError, PageId, Result, PAGE_SIZE};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Manages reading and writing pages within a single index data file.
///
/// Pages are addressed by dense page numbers. Freed pages go onto an
/// in-memory free list and are recycled by later allocations; the free
/// list is not persisted across processes.
pub struct DiskManager {
    config: DiskManagerConfig,
    state: Mutex<DiskState>,
}

struct DiskState {
    file: std::fs::File,
    num_pages: u32,
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Opens or creates the backing data file.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        if let Some(dir) = config.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            config,
            state: Mutex::new(DiskState {
                file,
                num_pages,
                free_pages: Vec::new(),
            }),
        })
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Returns the number of pages in the file (allocated or freed).
    pub fn num_pages(&self) -> u32 {
        self.state.lock().num_pages
    }

    /// Returns the number of pages currently on the free list.
    pub fn free_page_count(&self) -> usize {
        self.state.lock().free_pages.len()
    }

    /// Reads a page from disk into the provided buffer.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut state = self.state.lock();

        if !page_id.is_valid() || page_id.0 >= state.num_pages {
            return Err(OrchardError::PageNotFound { page_id: page_id.0 });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut state = self.state.lock();

        if !page_id.is_valid() {
            return Err(OrchardError::PageNotFound { page_id: page_id.0 });
        }

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(data)?;

        if self.config.fsync_enabled {
            state.file.sync_all()?;
        }

        if page_id.0 >= state.num_pages {
            state.num_pages = page_id.0 + 1;
        }

        Ok(())
    }

    /// Allocates a page, recycling a freed one if available.
    ///
    /// The page contents are zeroed either way.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();
        let zero = [0u8; PAGE_SIZE];

        let page_id = match state.free_pages.pop() {
            Some(recycled) => recycled,
            None => {
                let page_id = PageId(state.num_pages);
                state.num_pages += 1;
                page_id
            }
        };

        let offset = (page_id.0 as u64) * (PAGE_SIZE as u64);
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&zero)?;

        if self.config.fsync_enabled {
            state.file.sync_all()?;
        }

        Ok(page_id)
    }

    /// Returns a page to the free list for later reuse.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();

        if !page_id.is_valid() || page_id.0 >= state.num_pages {
            return Err(OrchardError::PageNotFound { page_id: page_id.0 });
        }
        debug_assert!(!state.free_pages.contains(&page_id));

        state.free_pages.push(page_id);
        Ok(())
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.state.lock().file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.state.lock().file.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            path: dir.path().join("test.dat"),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert_eq!(dm.num_pages(), 0);
        assert_eq!(dm.free_page_count(), 0);
    }

    #[test]
    fn test_disk_manager_allocate_page() {
        let (dm, _dir) = create_test_disk_manager();

        let page1 = dm.allocate_page().unwrap();
        assert_eq!(page1, PageId(0));

        let page2 = dm.allocate_page().unwrap();
        assert_eq!(page2, PageId(1));

        assert_eq!(dm.num_pages(), 2);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let page_id = dm.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut read_data).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[100], 0xCD);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_read_nonexistent_page() {
        let (dm, _dir) = create_test_disk_manager();

        dm.allocate_page().unwrap();

        let mut buf = [0u8; PAGE_SIZE];
        let result = dm.read_page(PageId(99), &mut buf);
        assert!(matches!(result, Err(OrchardError::PageNotFound { .. })));

        let result = dm.read_page(PageId::INVALID, &mut buf);
        assert!(result.is_err());
    }

    #[test]
    fn test_disk_manager_recycle_freed_page() {
        let (dm, _dir) = create_test_disk_manager();

        let p0 = dm.allocate_page().unwrap();
        let p1 = dm.allocate_page().unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xFF;
        dm.write_page(p1, &data).unwrap();

        dm.deallocate_page(p1).unwrap();
        assert_eq!(dm.free_page_count(), 1);

        // Recycled page comes back zeroed
        let p2 = dm.allocate_page().unwrap();
        assert_eq!(p2, p1);
        assert_eq!(dm.free_page_count(), 0);

        let mut read_data = [0u8; PAGE_SIZE];
        dm.read_page(p2, &mut read_data).unwrap();
        assert_eq!(read_data[0], 0);

        // File was not extended
        assert_eq!(dm.num_pages(), 2);
        let _ = p0;
    }

    #[test]
    fn test_disk_manager_deallocate_unknown_page() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.deallocate_page(PageId(3)).is_err());
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.dat");
        let page_id;

        {
            let config = DiskManagerConfig {
                path: path.clone(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            page_id = dm.allocate_page().unwrap();

            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let config = DiskManagerConfig {
                path,
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            assert_eq!(dm.num_pages(), 1);

            let mut read_data = [0u8; PAGE_SIZE];
            dm.read_page(page_id, &mut read_data).unwrap();
            assert_eq!(read_data[0], 0xFF);
        }
    }
}
