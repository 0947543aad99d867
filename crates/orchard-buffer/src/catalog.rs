//! File-entry directory stored in a reserved disk page.

use crate::disk::DiskManager;
use orchard_common::{OrchardError, PageId, Result, PAGE_SIZE};
use std::sync::Arc;

/// The disk page holding the directory.
const DIRECTORY_PAGE: PageId = PageId(0);

/// Maps index file names to their header pages.
///
/// Entries are packed into disk page 0: an entry count followed by
/// `(name_len: u16, name bytes, header_page: u32)` records. The page is
/// rewritten in full on every mutation.
pub struct Catalog {
    disk: Arc<DiskManager>,
}

impl Catalog {
    /// Opens the catalog, reserving the directory page on a fresh file.
    pub fn new(disk: Arc<DiskManager>) -> Result<Self> {
        if disk.num_pages() == 0 {
            let page = disk.allocate_page()?;
            debug_assert_eq!(page, DIRECTORY_PAGE);
        }
        Ok(Self { disk })
    }

    /// Looks up the header page recorded for a file name.
    pub fn get_file_entry(&self, name: &str) -> Result<Option<PageId>> {
        let entries = self.load()?;
        Ok(entries
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, page)| page))
    }

    /// Records a new file entry.
    pub fn add_file_entry(&self, name: &str, header_page: PageId) -> Result<()> {
        let mut entries = self.load()?;
        if entries.iter().any(|(n, _)| n == name) {
            return Err(OrchardError::FileAlreadyExists(name.to_string()));
        }
        entries.push((name.to_string(), header_page));
        self.store(&entries)
    }

    /// Removes a file entry.
    pub fn delete_file_entry(&self, name: &str) -> Result<()> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|(n, _)| n != name);
        if entries.len() == before {
            return Err(OrchardError::MissingFile(name.to_string()));
        }
        self.store(&entries)
    }

    fn load(&self) -> Result<Vec<(String, PageId)>> {
        let mut page = [0u8; PAGE_SIZE];
        self.disk.read_page(DIRECTORY_PAGE, &mut page)?;

        let count = u16::from_le_bytes([page[0], page[1]]) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut offset = 2;

        for _ in 0..count {
            if offset + 2 > PAGE_SIZE {
                return Err(OrchardError::Corrupted(
                    "catalog directory page truncated".to_string(),
                ));
            }
            let name_len = u16::from_le_bytes([page[offset], page[offset + 1]]) as usize;
            offset += 2;
            if offset + name_len + 4 > PAGE_SIZE {
                return Err(OrchardError::Corrupted(
                    "catalog directory page truncated".to_string(),
                ));
            }
            let name = String::from_utf8(page[offset..offset + name_len].to_vec())
                .map_err(|_| OrchardError::Corrupted("catalog entry name".to_string()))?;
            offset += name_len;
            let header_page = PageId(u32::from_le_bytes([
                page[offset],
                page[offset + 1],
                page[offset + 2],
                page[offset + 3],
            ]));
            offset += 4;
            entries.push((name, header_page));
        }

        Ok(entries)
    }

    fn store(&self, entries: &[(String, PageId)]) -> Result<()> {
        let needed: usize = 2 + entries.iter().map(|(n, _)| 2 + n.len() + 4).sum::<usize>();
        if needed > PAGE_SIZE {
            return Err(OrchardError::CatalogFull);
        }

        let mut page = [0u8; PAGE_SIZE];
        page[0..2].copy_from_slice(&(entries.len() as u16).to_le_bytes());
        let mut offset = 2;

        for (name, header_page) in entries {
            page[offset..offset + 2].copy_from_slice(&(name.len() as u16).to_le_bytes());
            offset += 2;
            page[offset..offset + name.len()].copy_from_slice(name.as_bytes());
            offset += name.len();
            page[offset..offset + 4].copy_from_slice(&header_page.0.to_le_bytes());
            offset += 4;
        }

        self.disk.write_page(DIRECTORY_PAGE, &page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_common::config::DiskManagerConfig;
    use tempfile::tempdir;

    fn create_test_catalog() -> (Catalog, Arc<DiskManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(DiskManagerConfig {
                path: dir.path().join("catalog.dat"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let catalog = Catalog::new(Arc::clone(&disk)).unwrap();
        (catalog, disk, dir)
    }

    #[test]
    fn test_catalog_reserves_directory_page() {
        let (_catalog, disk, _dir) = create_test_catalog();
        assert_eq!(disk.num_pages(), 1);
    }

    #[test]
    fn test_catalog_add_and_get() {
        let (catalog, _disk, _dir) = create_test_catalog();

        catalog.add_file_entry("orders_pk", PageId(3)).unwrap();
        catalog.add_file_entry("users_email", PageId(7)).unwrap();

        assert_eq!(catalog.get_file_entry("orders_pk").unwrap(), Some(PageId(3)));
        assert_eq!(
            catalog.get_file_entry("users_email").unwrap(),
            Some(PageId(7))
        );
        assert_eq!(catalog.get_file_entry("missing").unwrap(), None);
    }

    #[test]
    fn test_catalog_duplicate_name() {
        let (catalog, _disk, _dir) = create_test_catalog();

        catalog.add_file_entry("orders_pk", PageId(3)).unwrap();
        let result = catalog.add_file_entry("orders_pk", PageId(9));
        assert!(matches!(result, Err(OrchardError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_catalog_delete() {
        let (catalog, _disk, _dir) = create_test_catalog();

        catalog.add_file_entry("orders_pk", PageId(3)).unwrap();
        catalog.delete_file_entry("orders_pk").unwrap();
        assert_eq!(catalog.get_file_entry("orders_pk").unwrap(), None);

        let result = catalog.delete_file_entry("orders_pk");
        assert!(matches!(result, Err(OrchardError::MissingFile(_))));
    }

    #[test]
    fn test_catalog_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.dat");

        {
            let disk = Arc::new(
                DiskManager::new(DiskManagerConfig {
                    path: path.clone(),
                    fsync_enabled: true,
                })
                .unwrap(),
            );
            let catalog = Catalog::new(disk).unwrap();
            catalog.add_file_entry("orders_pk", PageId(5)).unwrap();
        }

        {
            let disk = Arc::new(
                DiskManager::new(DiskManagerConfig {
                    path,
                    fsync_enabled: true,
                })
                .unwrap(),
            );
            let catalog = Catalog::new(disk).unwrap();
            assert_eq!(catalog.get_file_entry("orders_pk").unwrap(), Some(PageId(5)));
        }
    }
}
