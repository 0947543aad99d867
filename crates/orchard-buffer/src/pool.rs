//! Buffer manager: a fixed pool of page frames with pin/unpin discipline.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use orchard_common::config::BufferManagerConfig;
use orchard_common::page::{PageId, PAGE_SIZE};
use orchard_common::{OrchardError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Buffer manager over a disk manager.
///
/// Every page access goes through the pin protocol: `pin` makes the page
/// resident and guarantees it stays so, `read`/`write` operate on a pinned
/// page's bytes, and `unpin` releases the residency guarantee, recording
/// whether the page was modified. Dirty frames are written back when they
/// are evicted, freed, or flushed.
pub struct BufferManager {
    disk: Arc<DiskManager>,
    frames: Vec<BufferFrame>,
    page_table: Mutex<HashMap<PageId, FrameId>>,
    free_list: Mutex<Vec<FrameId>>,
    /// Clock hand position for the eviction sweep.
    clock_hand: Mutex<usize>,
}

impl BufferManager {
    /// Creates a new buffer manager with the given number of frames.
    pub fn new(disk: Arc<DiskManager>, config: BufferManagerConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            disk,
            frames,
            page_table: Mutex::new(HashMap::with_capacity(num_frames)),
            free_list: Mutex::new(free_list),
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the disk manager backing this pool.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Pins a page, loading it from disk if it is not resident.
    pub fn pin(&self, page_id: PageId) -> Result<()> {
        let mut table = self.page_table.lock();

        if let Some(&frame_id) = table.get(&page_id) {
            self.frames[frame_id.0 as usize].pin();
            return Ok(());
        }

        let frame_id = self.acquire_frame(&mut table)?;
        let frame = &self.frames[frame_id.0 as usize];

        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        }
        frame.set_page_id(Some(page_id));
        frame.set_dirty(false);
        frame.pin();
        table.insert(page_id, frame_id);
        trace!(%page_id, %frame_id, "page loaded into pool");

        Ok(())
    }

    /// Unpins a page, recording whether it was modified.
    pub fn unpin(&self, page_id: PageId, dirty: bool) -> Result<()> {
        let table = self.page_table.lock();
        let &frame_id = table
            .get(&page_id)
            .ok_or(OrchardError::PageNotFound { page_id: page_id.0 })?;
        let frame = &self.frames[frame_id.0 as usize];

        if !frame.is_pinned() {
            return Err(OrchardError::PageNotPinned { page_id: page_id.0 });
        }
        if dirty {
            frame.set_dirty(true);
        }
        frame.unpin();
        Ok(())
    }

    /// Allocates a new zeroed page, resident and pinned.
    pub fn allocate(&self) -> Result<PageId> {
        let mut table = self.page_table.lock();

        let frame_id = self.acquire_frame(&mut table)?;
        let page_id = match self.disk.allocate_page() {
            Ok(page_id) => page_id,
            Err(e) => {
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        };

        let frame = &self.frames[frame_id.0 as usize];
        frame.write_data().fill(0);
        frame.set_page_id(Some(page_id));
        frame.set_dirty(false);
        frame.pin();
        table.insert(page_id, frame_id);
        trace!(%page_id, "page allocated");

        Ok(page_id)
    }

    /// Frees a page, releasing its frame and deallocating it on disk.
    ///
    /// Fails with `PagePinned` if the page is still pinned.
    pub fn free(&self, page_id: PageId) -> Result<()> {
        let mut table = self.page_table.lock();

        if let Some(&frame_id) = table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return Err(OrchardError::PagePinned { page_id: page_id.0 });
            }
            table.remove(&page_id);
            frame.reset();
            self.free_list.lock().push(frame_id);
        }

        self.disk.deallocate_page(page_id)?;
        trace!(%page_id, "page freed");
        Ok(())
    }

    /// Runs a closure over a pinned page's bytes.
    pub fn read<R>(&self, page_id: PageId, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> Result<R> {
        let frame_id = self.resident_pinned(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        let data = frame.read_data();
        Ok(f(&**data))
    }

    /// Runs a closure over a pinned page's bytes, mutably.
    ///
    /// Dirtiness is not inferred from `write`; the caller declares it at
    /// unpin time, per the pin protocol.
    pub fn write<R>(
        &self,
        page_id: PageId,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> Result<R> {
        let frame_id = self.resident_pinned(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        let mut data = frame.write_data();
        Ok(f(&mut **data))
    }

    /// Writes every dirty frame back to disk.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let table = self.page_table.lock();
        let mut flushed = 0;

        for (&page_id, &frame_id) in table.iter() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
                frame.set_dirty(false);
                flushed += 1;
            }
        }

        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferStats {
        let table = self.page_table.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for &frame_id in table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferStats {
            total_frames: self.frames.len(),
            free_frames: self.free_list.lock().len(),
            used_frames: table.len(),
            pinned_frames,
            dirty_frames,
        }
    }

    /// Looks up a page that must be resident and pinned.
    fn resident_pinned(&self, page_id: PageId) -> Result<FrameId> {
        let table = self.page_table.lock();
        let &frame_id = table
            .get(&page_id)
            .ok_or(OrchardError::PageNotFound { page_id: page_id.0 })?;
        if !self.frames[frame_id.0 as usize].is_pinned() {
            return Err(OrchardError::PageNotPinned { page_id: page_id.0 });
        }
        Ok(frame_id)
    }

    /// Acquires a frame for a new resident page.
    ///
    /// Takes from the free list first, then evicts an unpinned victim by
    /// clock sweep, writing it back if dirty.
    fn acquire_frame(&self, table: &mut HashMap<PageId, FrameId>) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        let victim = self.pick_victim()?;
        let frame = &self.frames[victim.0 as usize];

        if let Some(old_page_id) = frame.page_id() {
            if frame.is_dirty() {
                let data = frame.read_data();
                self.disk.write_page(old_page_id, &data)?;
            }
            table.remove(&old_page_id);
            trace!(page_id = %old_page_id, "page evicted");
        }
        frame.reset();

        Ok(victim)
    }

    /// Clock sweep: clear reference bits until an unpinned, unreferenced
    /// frame turns up. Two full revolutions without a candidate means every
    /// frame is pinned.
    fn pick_victim(&self) -> Result<FrameId> {
        let mut hand = self.clock_hand.lock();
        let n = self.frames.len();

        for _ in 0..(2 * n) {
            let frame = &self.frames[*hand];
            let candidate = FrameId(*hand as u32);
            *hand = (*hand + 1) % n;

            if frame.is_pinned() || frame.is_empty() {
                continue;
            }
            if frame.reference_bit() {
                frame.set_reference_bit(false);
                continue;
            }
            return Ok(candidate);
        }

        Err(OrchardError::BufferPoolFull)
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames holding pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
