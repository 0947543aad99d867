//! Bounded range scans over the leaf sibling chain.

use crate::btree::key::{key_compare, IndexKey, KeyType, Rid};
use crate::btree::page::LeafPage;
use orchard_buffer::BufferManager;
use orchard_common::{PageId, Result};
use std::cmp::Ordering;
use std::sync::Arc;

/// An in-progress range scan.
///
/// The scan keeps its current leaf pinned and walks the sibling chain
/// until the high bound is exceeded or the chain ends. Dropping the scan
/// releases the pin.
pub struct BTreeScan {
    buffer: Arc<BufferManager>,
    key_type: KeyType,
    /// Current leaf, pinned; None once the scan is exhausted.
    leaf: Option<(PageId, LeafPage)>,
    slot: usize,
    hi_key: Option<IndexKey>,
}

impl BTreeScan {
    /// Builds a scan from a positioned (and pinned) starting leaf, or an
    /// exhausted scan when there is nothing to yield.
    pub(crate) fn open(
        buffer: Arc<BufferManager>,
        key_type: KeyType,
        start: Option<(PageId, usize)>,
        hi_key: Option<IndexKey>,
    ) -> Result<Self> {
        let (leaf, slot) = match start {
            Some((page_id, slot)) => {
                let leaf = buffer.read(page_id, |data| LeafPage::from_bytes(data, key_type))??;
                (Some((page_id, leaf)), slot)
            }
            None => (None, 0),
        };
        Ok(Self {
            buffer,
            key_type,
            leaf,
            slot,
            hi_key,
        })
    }

    /// Yields the next entry within bounds, or None when the scan is done.
    pub fn next(&mut self) -> Result<Option<(IndexKey, Rid)>> {
        loop {
            let Some((page_id, leaf)) = &self.leaf else {
                return Ok(None);
            };
            match leaf.entry_at(self.slot)? {
                Some((key, rid)) => {
                    if let Some(hi) = &self.hi_key {
                        if key_compare(&key, hi) == Ordering::Greater {
                            self.finish()?;
                            return Ok(None);
                        }
                    }
                    self.slot += 1;
                    return Ok(Some((key, rid)));
                }
                None => {
                    let next = leaf.next_page();
                    let page_id = *page_id;
                    self.leaf = None;
                    self.buffer.unpin(page_id, false)?;
                    if !next.is_valid() {
                        return Ok(None);
                    }
                    self.buffer.pin(next)?;
                    let leaf = self
                        .buffer
                        .read(next, |data| LeafPage::from_bytes(data, self.key_type))??;
                    self.leaf = Some((next, leaf));
                    self.slot = 0;
                }
            }
        }
    }

    /// Collects every remaining entry. Convenience for tests and small
    /// scans.
    pub fn collect_all(&mut self) -> Result<Vec<(IndexKey, Rid)>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next()? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn finish(&mut self) -> Result<()> {
        if let Some((page_id, _)) = self.leaf.take() {
            self.buffer.unpin(page_id, false)?;
        }
        Ok(())
    }
}

impl Drop for BTreeScan {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
