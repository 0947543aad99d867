//! The B+ tree file: open/create, insert, delete, scan entry point.

use crate::btree::constants::{
    HALF_INDEX_PAGE_CAPACITY, HALF_LEAF_PAGE_CAPACITY, MAX_KEY_SIZE,
};
use crate::btree::header::{DeletePolicy, HeaderPage};
use crate::btree::key::{entry_len, key_compare, IndexKey, KeyType, Rid};
use crate::btree::page::{IndexPage, LeafPage, NodeHeader, NodeKind, SortedPage, SLOT_SIZE};
use crate::btree::scan::BTreeScan;
use orchard_buffer::{BufferManager, Catalog};
use orchard_common::{OrchardError, PageId, Result, PAGE_SIZE};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A deletion notice propagated up the delete recursion: the separator key
/// anchoring the merged-away child, and that child's page id.
type DeletionNotice = (IndexKey, PageId);

/// A promotion entry propagated up the insert recursion: the separator key
/// for the new right sibling, and that sibling's page id.
type PromotionEntry = (IndexKey, PageId);

/// A disk-resident B+ tree index.
///
/// All pages live in the buffer pool and are accessed under the pin
/// protocol: pinned before use, unpinned (dirty when modified) on every
/// exit path. The header page stays pinned from open to close.
pub struct BTreeFile {
    buffer: Arc<BufferManager>,
    catalog: Arc<Catalog>,
    name: String,
    header_id: PageId,
    header: HeaderPage,
    key_type: KeyType,
    max_key_size: u16,
    policy: DeletePolicy,
    closed: bool,
}

impl BTreeFile {
    /// Opens an existing tree. The file entry must already be recorded in
    /// the catalog.
    pub fn open(buffer: Arc<BufferManager>, catalog: Arc<Catalog>, name: &str) -> Result<Self> {
        let header_id = catalog
            .get_file_entry(name)?
            .ok_or_else(|| OrchardError::MissingFile(name.to_string()))?;

        buffer.pin(header_id)?;
        let loaded = (|| {
            let header = buffer.read(header_id, HeaderPage::from_bytes)??;
            let key_type = header.key_type()?;
            let policy = header.delete_policy()?;
            Ok::<_, OrchardError>((header, key_type, policy))
        })();

        let (header, key_type, policy) = match loaded {
            Ok(parts) => parts,
            Err(e) => {
                let _ = buffer.unpin(header_id, false);
                return Err(e);
            }
        };
        let max_key_size = header.max_key_size();

        Ok(Self {
            buffer,
            catalog,
            name: name.to_string(),
            header_id,
            header,
            key_type,
            max_key_size,
            policy,
            closed: false,
        })
    }

    /// Opens the tree if the file entry exists, otherwise creates it with
    /// the given parameters.
    pub fn create_or_open(
        buffer: Arc<BufferManager>,
        catalog: Arc<Catalog>,
        name: &str,
        key_type: KeyType,
        max_key_size: u16,
        policy: DeletePolicy,
    ) -> Result<Self> {
        if max_key_size as usize > MAX_KEY_SIZE {
            return Err(OrchardError::KeyTooLong {
                size: max_key_size as usize,
                max: MAX_KEY_SIZE,
            });
        }
        if catalog.get_file_entry(name)?.is_some() {
            return Self::open(buffer, catalog, name);
        }

        let header_id = buffer.allocate()?;
        let header = HeaderPage::init(header_id, key_type, max_key_size, policy);
        let bytes = *header.as_bytes();
        buffer.write(header_id, |data| data.copy_from_slice(&bytes))?;
        // Clock the dirty bit in now; the lifetime pin from allocate stays
        buffer.pin(header_id)?;
        buffer.unpin(header_id, true)?;
        catalog.add_file_entry(name, header_id)?;
        debug!(file = name, %header_id, "created index file");

        Ok(Self {
            buffer,
            catalog,
            name: name.to_string(),
            header_id,
            header,
            key_type,
            max_key_size,
            policy,
            closed: false,
        })
    }

    /// Closes the tree, unpinning the header page dirty.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.buffer.unpin(self.header_id, true)?;
        }
        Ok(())
    }

    /// Destroys the tree: frees every reachable page, the header page, and
    /// the catalog entry.
    pub fn destroy(mut self) -> Result<()> {
        let root = self.header.root_id();
        if root.is_valid() {
            self.destroy_subtree(root)?;
        }
        self.buffer.unpin(self.header_id, false)?;
        self.closed = true;
        self.buffer.free(self.header_id)?;
        self.catalog.delete_file_entry(&self.name)?;
        debug!(file = %self.name, "index file destroyed");
        Ok(())
    }

    fn destroy_subtree(&self, page_id: PageId) -> Result<()> {
        self.buffer.pin(page_id)?;
        match self.node_kind(page_id)? {
            NodeKind::Index => {
                let index = self.read_index(page_id)?;
                let mut children = vec![index.left_link()];
                children.extend(index.entries()?.into_iter().map(|(_, child)| child));
                self.buffer.unpin(page_id, false)?;

                for child in children {
                    if child.is_valid() {
                        self.destroy_subtree(child)?;
                    }
                }
                self.buffer.free(page_id)
            }
            NodeKind::Leaf => {
                self.buffer.unpin(page_id, false)?;
                self.buffer.free(page_id)
            }
            NodeKind::Header => {
                self.buffer.unpin(page_id, false)?;
                Err(OrchardError::InvalidNodeType)
            }
        }
    }

    /// The name this tree is recorded under in the catalog.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current root page id, INVALID when the tree is empty.
    pub fn root_id(&self) -> PageId {
        self.header.root_id()
    }

    /// The key type declared at creation.
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// The delete policy declared at creation.
    pub fn delete_policy(&self) -> DeletePolicy {
        self.policy
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts an entry with the given key and rid.
    pub fn insert(&mut self, key: &IndexKey, rid: Rid) -> Result<()> {
        self.check_key(key)?;

        let root_id = self.header.root_id();
        if !root_id.is_valid() {
            // Empty tree: the first leaf becomes the root
            let new_root = self.buffer.allocate()?;
            let mut leaf = LeafPage::init(new_root, self.key_type);
            leaf.insert_entry(key, rid)?;
            self.write_page(new_root, leaf.as_bytes())?;
            self.buffer.unpin(new_root, true)?;
            self.update_header(new_root)?;
            debug!(root = %new_root, "created root leaf");
            return Ok(());
        }

        if let Some((sep_key, right_id)) = self.insert_into(key, rid, root_id)? {
            // The root split: grow the tree by one level
            let new_root = self.buffer.allocate()?;
            let mut root = IndexPage::init(new_root, self.key_type);
            root.set_left_link(root_id);
            root.insert_entry(&sep_key, right_id)?;
            self.write_page(new_root, root.as_bytes())?;
            self.buffer.unpin(new_root, true)?;
            self.update_header(new_root)?;
            debug!(root = %new_root, "root split, tree grew a level");
        }
        Ok(())
    }

    /// Recursive descent for insert. Returns the promotion entry when the
    /// visited node split.
    fn insert_into(
        &self,
        key: &IndexKey,
        rid: Rid,
        current_id: PageId,
    ) -> Result<Option<PromotionEntry>> {
        self.buffer.pin(current_id)?;
        match self.node_kind(current_id)? {
            NodeKind::Index => {
                let index = self.read_index(current_id)?;
                let child_id = index.page_no_by_key(key)?;
                // Drop the pin across the recursion to keep pin depth flat
                self.buffer.unpin(current_id, false)?;

                let Some((sep_key, new_child)) = self.insert_into(key, rid, child_id)? else {
                    return Ok(None);
                };

                self.buffer.pin(current_id)?;
                let mut index = self.read_index(current_id)?;
                match index.insert_entry(&sep_key, new_child) {
                    Ok(()) => {
                        self.write_page(current_id, index.as_bytes())?;
                        self.buffer.unpin(current_id, true)?;
                        Ok(None)
                    }
                    Err(OrchardError::PageFull) => self
                        .split_index(current_id, index, sep_key, new_child)
                        .map(Some),
                    Err(e) => {
                        self.buffer.unpin(current_id, false)?;
                        Err(e)
                    }
                }
            }
            NodeKind::Leaf => {
                let mut leaf = self.read_leaf(current_id)?;
                match leaf.insert_entry(key, rid) {
                    Ok(()) => {
                        self.write_page(current_id, leaf.as_bytes())?;
                        self.buffer.unpin(current_id, true)?;
                        Ok(None)
                    }
                    Err(OrchardError::PageFull) => {
                        self.split_leaf(current_id, leaf, key, rid).map(Some)
                    }
                    Err(e) => {
                        self.buffer.unpin(current_id, false)?;
                        Err(e)
                    }
                }
            }
            NodeKind::Header => {
                self.buffer.unpin(current_id, false)?;
                Err(OrchardError::InvalidNodeType)
            }
        }
    }

    /// Splits a full leaf around the incoming entry.
    ///
    /// Entries fan out to the new right sibling, then move back until free
    /// space is balanced; the sibling chain is rewired; the new page's
    /// first key is promoted.
    fn split_leaf(
        &self,
        current_id: PageId,
        mut current: LeafPage,
        key: &IndexKey,
        rid: Rid,
    ) -> Result<PromotionEntry> {
        let new_id = self.buffer.allocate()?;
        let mut new_leaf = LeafPage::init(new_id, self.key_type);

        let mut right = current.entries()?;
        let mut left: Vec<(IndexKey, Rid)> = Vec::new();
        while right.len() > 1 && leaf_space(&left) > leaf_space(&right) {
            left.push(right.remove(0));
        }

        // Strictly greater than the new page's first key goes right;
        // equal or less goes left
        let boundary = right
            .first()
            .cloned()
            .ok_or_else(|| OrchardError::Corrupted("split of empty leaf".to_string()))?;
        if key_compare(key, &boundary.0) == Ordering::Greater {
            insert_sorted_leaf(&mut right, key.clone(), rid);
        } else {
            insert_sorted_leaf(&mut left, key.clone(), rid);
        }

        current.set_entries(&left)?;
        new_leaf.set_entries(&right)?;

        // Wire the new page into the sibling chain
        let old_next = current.next_page();
        new_leaf.set_next_page(old_next);
        new_leaf.set_prev_page(current_id);
        if old_next.is_valid() {
            self.buffer.pin(old_next)?;
            let mut next = self.read_leaf(old_next)?;
            next.set_prev_page(new_id);
            self.write_page(old_next, next.as_bytes())?;
            self.buffer.unpin(old_next, true)?;
        }
        current.set_next_page(new_id);

        let sep_key = new_leaf
            .first_key()?
            .ok_or_else(|| OrchardError::Corrupted("split produced empty leaf".to_string()))?;

        self.write_page(current_id, current.as_bytes())?;
        self.buffer.unpin(current_id, true)?;
        self.write_page(new_id, new_leaf.as_bytes())?;
        self.buffer.unpin(new_id, true)?;

        debug!(left = %current_id, right = %new_id, separator = %sep_key, "leaf split");
        Ok((sep_key, new_id))
    }

    /// Splits a full index page around the incoming promotion entry.
    ///
    /// The first entry of the new right page is lifted out: its key becomes
    /// the promoted separator and its child becomes the new page's
    /// left-link.
    fn split_index(
        &self,
        current_id: PageId,
        mut current: IndexPage,
        sep_key: IndexKey,
        new_child: PageId,
    ) -> Result<PromotionEntry> {
        let new_id = self.buffer.allocate()?;
        let mut new_index = IndexPage::init(new_id, self.key_type);

        let mut right = current.entries()?;
        let mut left: Vec<(IndexKey, PageId)> = Vec::new();
        while left.len() < right.len() {
            left.push(right.remove(0));
        }
        if right.is_empty() {
            return Err(OrchardError::Corrupted("split of empty index page".to_string()));
        }
        let (boundary_key, boundary_child) = right.remove(0);

        if key_compare(&sep_key, &boundary_key) == Ordering::Greater {
            insert_sorted_index(&mut right, sep_key, new_child);
        } else {
            insert_sorted_index(&mut left, sep_key, new_child);
        }

        new_index.set_left_link(boundary_child);
        current.set_entries(&left)?;
        new_index.set_entries(&right)?;

        self.write_page(current_id, current.as_bytes())?;
        self.buffer.unpin(current_id, true)?;
        self.write_page(new_id, new_index.as_bytes())?;
        self.buffer.unpin(new_id, true)?;

        debug!(left = %current_id, right = %new_id, separator = %boundary_key, "index split");
        Ok((boundary_key, new_id))
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Deletes the entry with the given key and rid.
    ///
    /// Returns true iff an entry was removed. Under the NAIVE policy pages
    /// are never rebalanced; under FULL, under-filled pages borrow from or
    /// merge with a sibling.
    pub fn delete(&mut self, key: &IndexKey, rid: Rid) -> Result<bool> {
        self.check_key(key)?;
        if !self.header.root_id().is_valid() {
            return Ok(false);
        }
        match self.policy {
            DeletePolicy::Naive => Ok(self.remove_leaf_entry(key, rid)?.is_some()),
            DeletePolicy::Full => {
                let root = self.header.root_id();
                let (removed, notice) = self.full_delete(key, rid, root, None)?;
                debug_assert!(notice.is_none());
                Ok(removed)
            }
        }
    }

    /// Locates and removes the exact `(key, rid)` entry, scanning right
    /// from the run start across duplicate runs.
    ///
    /// Returns the page the entry was removed from, with that leaf's first
    /// key before removal.
    fn remove_leaf_entry(
        &self,
        key: &IndexKey,
        rid: Rid,
    ) -> Result<Option<(PageId, Option<IndexKey>)>> {
        let Some((mut leaf_id, mut slot)) = self.find_run_start(Some(key))? else {
            return Ok(None);
        };

        loop {
            let leaf = self.read_leaf(leaf_id)?;
            match leaf.entry_at(slot)? {
                None => {
                    let next = leaf.next_page();
                    self.buffer.unpin(leaf_id, false)?;
                    if !next.is_valid() {
                        return Ok(None);
                    }
                    self.buffer.pin(next)?;
                    leaf_id = next;
                    slot = 0;
                }
                Some((entry_key, entry_rid)) => {
                    if key_compare(&entry_key, key) == Ordering::Greater {
                        self.buffer.unpin(leaf_id, false)?;
                        return Ok(None);
                    }
                    if entry_rid == rid {
                        let first_before = leaf.first_key()?;
                        let mut leaf = leaf;
                        leaf.delete_at(slot)?;
                        self.write_page(leaf_id, leaf.as_bytes())?;
                        self.buffer.unpin(leaf_id, true)?;
                        return Ok(Some((leaf_id, first_before)));
                    }
                    slot += 1;
                }
            }
        }
    }

    /// Recursive descent for full delete. The parent index page travels
    /// down as a page id, never stored in nodes.
    ///
    /// Returns whether an entry was removed, plus a deletion notice when
    /// the visited node merged away.
    fn full_delete(
        &mut self,
        key: &IndexKey,
        rid: Rid,
        current_id: PageId,
        parent: Option<PageId>,
    ) -> Result<(bool, Option<DeletionNotice>)> {
        self.buffer.pin(current_id)?;
        match self.node_kind(current_id)? {
            NodeKind::Index => {
                let index = self.read_index(current_id)?;
                let child_id = index.page_no_by_key(key)?;
                self.buffer.unpin(current_id, false)?;

                let (removed, notice) = self.full_delete(key, rid, child_id, Some(current_id))?;
                let Some((notice_key, freed_child)) = notice else {
                    return Ok((removed, None));
                };

                self.buffer.pin(current_id)?;
                let mut index = self.read_index(current_id)?;
                if !index.remove_separator(&notice_key, freed_child)? {
                    self.buffer.unpin(current_id, false)?;
                    return Err(OrchardError::Corrupted(format!(
                        "no separator for merged child {freed_child} on {current_id}"
                    )));
                }
                trace!(%current_id, %freed_child, "separator removed after merge");

                if index.slot_count() >= HALF_INDEX_PAGE_CAPACITY {
                    self.write_page(current_id, index.as_bytes())?;
                    self.buffer.unpin(current_id, true)?;
                    return Ok((removed, None));
                }

                match parent {
                    None => {
                        // The root is exempt from the occupancy floor; it
                        // collapses only when it runs out of separators
                        let empty = index.is_empty();
                        let left_link = index.left_link();
                        self.write_page(current_id, index.as_bytes())?;
                        self.buffer.unpin(current_id, true)?;
                        if empty {
                            self.collapse_root(current_id, left_link)?;
                        }
                        Ok((removed, None))
                    }
                    Some(parent_id) => {
                        let notice = self.rebalance_index(current_id, index, parent_id, key)?;
                        Ok((removed, notice))
                    }
                }
            }
            NodeKind::Leaf => {
                self.buffer.unpin(current_id, false)?;
                let Some((leaf_id, first_before)) = self.remove_leaf_entry(key, rid)? else {
                    return Ok((false, None));
                };

                let Some(parent_id) = parent else {
                    // The root is a leaf: drop to the empty tree when its
                    // last entry goes
                    self.buffer.pin(leaf_id)?;
                    let leaf = self.read_leaf(leaf_id)?;
                    let empty = leaf.is_empty();
                    self.buffer.unpin(leaf_id, false)?;
                    if empty {
                        self.update_header(PageId::INVALID)?;
                        self.buffer.free(leaf_id)?;
                        debug!(%leaf_id, "root leaf drained, tree is empty");
                    }
                    return Ok((true, None));
                };

                self.buffer.pin(leaf_id)?;
                let leaf = self.read_leaf(leaf_id)?;
                if leaf.slot_count() >= HALF_LEAF_PAGE_CAPACITY {
                    self.buffer.unpin(leaf_id, false)?;
                    return Ok((true, None));
                }
                let notice = self.rebalance_leaf(leaf_id, leaf, first_before, parent_id)?;
                Ok((true, notice))
            }
            NodeKind::Header => {
                self.buffer.unpin(current_id, false)?;
                Err(OrchardError::InvalidNodeType)
            }
        }
    }

    /// Replaces an emptied root index page with its left-link child; an
    /// emptied leaf child drops the tree to empty.
    fn collapse_root(&mut self, old_root: PageId, left_link: PageId) -> Result<()> {
        self.buffer.pin(left_link)?;
        match self.node_kind(left_link)? {
            NodeKind::Index => {
                self.buffer.unpin(left_link, false)?;
                self.update_header(left_link)?;
            }
            NodeKind::Leaf => {
                let leaf = self.read_leaf(left_link)?;
                let empty = leaf.is_empty();
                self.buffer.unpin(left_link, false)?;
                if empty {
                    self.update_header(PageId::INVALID)?;
                    self.buffer.free(left_link)?;
                } else {
                    self.update_header(left_link)?;
                }
            }
            NodeKind::Header => {
                self.buffer.unpin(left_link, false)?;
                return Err(OrchardError::InvalidNodeType);
            }
        }
        self.buffer.free(old_root)?;
        debug!(%old_root, new_root = %self.header.root_id(), "root collapsed");
        Ok(())
    }

    /// Rebalances an under-filled leaf against its siblings.
    ///
    /// Tried in order: redistribute from the left sibling, redistribute
    /// from the right sibling, merge into the left, merge into the right.
    /// Returns a deletion notice when the leaf merged away.
    ///
    /// `leaf` arrives pinned; every path releases it and the parent.
    fn rebalance_leaf(
        &mut self,
        leaf_id: PageId,
        mut leaf: LeafPage,
        first_before: Option<IndexKey>,
        parent_id: PageId,
    ) -> Result<Option<DeletionNotice>> {
        self.buffer.pin(parent_id)?;
        let mut parent = self.read_index(parent_id)?;

        if !parent.contains_child(leaf_id)? {
            // A duplicate run carried the deletion into a leaf under some
            // other parent; leave that leaf under-filled
            self.buffer.unpin(parent_id, false)?;
            self.buffer.unpin(leaf_id, false)?;
            warn!(%leaf_id, "under-filled leaf outside the descent parent");
            return Ok(None);
        }

        let left_id = leaf.prev_page();
        let right_id = leaf.next_page();

        // Redistribute from the left sibling
        if left_id.is_valid() {
            self.buffer.pin(left_id)?;
            let mut left = self.read_leaf(left_id)?;
            if parent.contains_child(left_id)? && left.slot_count() > HALF_LEAF_PAGE_CAPACITY {
                let left_first_before = left.first_key()?;

                let mut donor = left.entries()?;
                donor.extend(leaf.entries()?);
                let keep = donor.split_off(donor.len() / 2);
                left.set_entries(&donor)?;
                leaf.set_entries(&keep)?;

                if let (Some(new), Some(old)) = (leaf.first_key()?, first_before) {
                    parent.adjust_key(&new, &old)?;
                }
                if let (Some(new), Some(old)) = (left.first_key()?, left_first_before) {
                    parent.adjust_key(&new, &old)?;
                }

                self.write_page(left_id, left.as_bytes())?;
                self.buffer.unpin(left_id, true)?;
                self.write_page(leaf_id, leaf.as_bytes())?;
                self.buffer.unpin(leaf_id, true)?;
                self.write_page(parent_id, parent.as_bytes())?;
                self.buffer.unpin(parent_id, true)?;
                debug!(%leaf_id, donor = %left_id, "leaf redistributed from left sibling");
                return Ok(None);
            }
            self.buffer.unpin(left_id, false)?;
        }

        // Redistribute from the right sibling
        if right_id.is_valid() {
            self.buffer.pin(right_id)?;
            let mut right = self.read_leaf(right_id)?;
            if parent.contains_child(right_id)? && right.slot_count() > HALF_LEAF_PAGE_CAPACITY {
                let right_first_before = right.first_key()?;

                let mut keep = leaf.entries()?;
                let mut donor = right.entries()?;
                while keep.len() < donor.len() {
                    keep.push(donor.remove(0));
                }
                leaf.set_entries(&keep)?;
                right.set_entries(&donor)?;

                if let (Some(new), Some(old)) = (right.first_key()?, right_first_before) {
                    parent.adjust_key(&new, &old)?;
                }
                if let (Some(new), Some(old)) = (leaf.first_key()?, first_before) {
                    parent.adjust_key(&new, &old)?;
                }

                self.write_page(right_id, right.as_bytes())?;
                self.buffer.unpin(right_id, true)?;
                self.write_page(leaf_id, leaf.as_bytes())?;
                self.buffer.unpin(leaf_id, true)?;
                self.write_page(parent_id, parent.as_bytes())?;
                self.buffer.unpin(parent_id, true)?;
                debug!(%leaf_id, donor = %right_id, "leaf redistributed from right sibling");
                return Ok(None);
            }
            self.buffer.unpin(right_id, false)?;
        }

        // Merge into the left sibling
        if left_id.is_valid() {
            self.buffer.pin(left_id)?;
            let mut left = self.read_leaf(left_id)?;
            if parent.contains_child(left_id)? && left.slot_count() == HALF_LEAF_PAGE_CAPACITY {
                let mut merged = left.entries()?;
                merged.extend(leaf.entries()?);
                left.set_entries(&merged)?;

                let next_id = leaf.next_page();
                if next_id.is_valid() {
                    self.buffer.pin(next_id)?;
                    let mut next = self.read_leaf(next_id)?;
                    next.set_prev_page(left_id);
                    self.write_page(next_id, next.as_bytes())?;
                    self.buffer.unpin(next_id, true)?;
                }
                left.set_next_page(next_id);
                leaf.set_prev_page(PageId::INVALID);
                leaf.set_next_page(PageId::INVALID);
                leaf.set_entries(&[])?;

                self.write_page(left_id, left.as_bytes())?;
                self.buffer.unpin(left_id, true)?;
                self.write_page(leaf_id, leaf.as_bytes())?;
                self.buffer.unpin(leaf_id, true)?;
                self.buffer.unpin(parent_id, false)?;
                self.buffer.free(leaf_id)?;

                let notice_key = first_before
                    .ok_or_else(|| OrchardError::Corrupted("merged leaf had no keys".to_string()))?;
                debug!(%leaf_id, into = %left_id, "leaf merged into left sibling");
                return Ok(Some((notice_key, leaf_id)));
            }
            self.buffer.unpin(left_id, false)?;
        }

        // Merge into the right sibling
        if right_id.is_valid() {
            self.buffer.pin(right_id)?;
            let mut right = self.read_leaf(right_id)?;
            if parent.contains_child(right_id)? && right.slot_count() == HALF_LEAF_PAGE_CAPACITY {
                let right_first_before = right.first_key()?;

                let mut merged = leaf.entries()?;
                merged.extend(right.entries()?);
                right.set_entries(&merged)?;

                let prev_id = leaf.prev_page();
                if prev_id.is_valid() {
                    self.buffer.pin(prev_id)?;
                    let mut prev = self.read_leaf(prev_id)?;
                    prev.set_next_page(right_id);
                    self.write_page(prev_id, prev.as_bytes())?;
                    self.buffer.unpin(prev_id, true)?;
                }
                right.set_prev_page(prev_id);
                leaf.set_prev_page(PageId::INVALID);
                leaf.set_next_page(PageId::INVALID);
                leaf.set_entries(&[])?;

                self.write_page(right_id, right.as_bytes())?;
                self.buffer.unpin(right_id, true)?;
                self.write_page(leaf_id, leaf.as_bytes())?;
                self.buffer.unpin(leaf_id, true)?;

                let notice = if parent.left_link() == leaf_id {
                    // The survivor takes over as left-link; its now
                    // redundant separator is what the parent must drop
                    parent.set_left_link(right_id);
                    let notice_key = parent.first_key()?.ok_or_else(|| {
                        OrchardError::Corrupted("left-link merge under empty parent".to_string())
                    })?;
                    (notice_key, leaf_id)
                } else {
                    if let (Some(new), Some(old)) = (right.first_key()?, right_first_before) {
                        parent.adjust_key(&new, &old)?;
                    }
                    let notice_key = first_before.ok_or_else(|| {
                        OrchardError::Corrupted("merged leaf had no keys".to_string())
                    })?;
                    (notice_key, leaf_id)
                };
                self.write_page(parent_id, parent.as_bytes())?;
                self.buffer.unpin(parent_id, true)?;
                self.buffer.free(leaf_id)?;

                debug!(%leaf_id, into = %right_id, "leaf merged into right sibling");
                return Ok(Some(notice));
            }
            self.buffer.unpin(right_id, false)?;
        }

        // No sibling can take or give; leave the leaf under-filled
        self.buffer.unpin(leaf_id, false)?;
        self.buffer.unpin(parent_id, false)?;
        warn!(%leaf_id, "leaf left under-filled, no eligible sibling");
        Ok(None)
    }

    /// Rebalances an under-filled index page against its siblings.
    ///
    /// Same ladder as the leaf case, with the extra left-link protocol:
    /// when separators move between index pages, the donor's left-link
    /// subtree travels as an explicit entry keyed by its smallest key, and
    /// the donor's new left-link is recomputed from its new first entry.
    ///
    /// `current` arrives pinned with the merged child's separator already
    /// removed; every path writes it back and releases the pins.
    fn rebalance_index(
        &mut self,
        current_id: PageId,
        mut current: IndexPage,
        parent_id: PageId,
        key: &IndexKey,
    ) -> Result<Option<DeletionNotice>> {
        self.buffer.pin(parent_id)?;
        let mut parent = self.read_index(parent_id)?;
        let left_id = parent.left_sibling_of(key)?;
        let right_id = parent.right_sibling_of(key)?;

        // Redistribute from the left sibling
        if let Some(left_id) = left_id {
            self.buffer.pin(left_id)?;
            let mut left = self.read_index(left_id)?;
            if left.slot_count() > HALF_INDEX_PAGE_CAPACITY {
                let own_link = current.left_link();
                let anchor_old = self.smallest_key_in_subtree(own_link)?;

                let mut donor = left.entries()?;
                donor.push((anchor_old.clone(), own_link));
                donor.extend(current.entries()?);

                let mut keep = donor.split_off(donor.len() / 2);
                let (_, new_link) = keep.remove(0);
                current.set_left_link(new_link);
                current.set_entries(&keep)?;
                left.set_entries(&donor)?;

                let anchor_new = self.smallest_key_in_subtree(new_link)?;
                parent.adjust_key(&anchor_new, &anchor_old)?;

                self.write_page(left_id, left.as_bytes())?;
                self.buffer.unpin(left_id, true)?;
                self.write_page(current_id, current.as_bytes())?;
                self.buffer.unpin(current_id, true)?;
                self.write_page(parent_id, parent.as_bytes())?;
                self.buffer.unpin(parent_id, true)?;
                debug!(%current_id, donor = %left_id, "index redistributed from left sibling");
                return Ok(None);
            }
            self.buffer.unpin(left_id, false)?;
        }

        // Redistribute from the right sibling
        if let Some(right_id) = right_id {
            self.buffer.pin(right_id)?;
            let mut right = self.read_index(right_id)?;
            if right.slot_count() > HALF_INDEX_PAGE_CAPACITY {
                let donor_link = right.left_link();
                let anchor_old = self.smallest_key_in_subtree(donor_link)?;

                let mut keep = current.entries()?;
                keep.push((anchor_old.clone(), donor_link));
                let mut donor = right.entries()?;
                // The donor also gives up its first remaining entry to
                // rebuild its left-link, so hold one back from the balance
                let move_count = donor.len().saturating_sub(keep.len() + 1) / 2;
                for _ in 0..move_count {
                    keep.push(donor.remove(0));
                }

                let (_, new_link) = donor.remove(0);
                right.set_left_link(new_link);
                current.set_entries(&keep)?;
                right.set_entries(&donor)?;

                let anchor_new = self.smallest_key_in_subtree(new_link)?;
                parent.adjust_key(&anchor_new, &anchor_old)?;

                self.write_page(right_id, right.as_bytes())?;
                self.buffer.unpin(right_id, true)?;
                self.write_page(current_id, current.as_bytes())?;
                self.buffer.unpin(current_id, true)?;
                self.write_page(parent_id, parent.as_bytes())?;
                self.buffer.unpin(parent_id, true)?;
                debug!(%current_id, donor = %right_id, "index redistributed from right sibling");
                return Ok(None);
            }
            self.buffer.unpin(right_id, false)?;
        }

        // Merge into the left sibling
        if let Some(left_id) = left_id {
            self.buffer.pin(left_id)?;
            let mut left = self.read_index(left_id)?;
            if left.slot_count() == HALF_INDEX_PAGE_CAPACITY {
                let own_link = current.left_link();
                let anchor = self.smallest_key_in_subtree(own_link)?;

                let mut merged = left.entries()?;
                merged.push((anchor.clone(), own_link));
                merged.extend(current.entries()?);
                left.set_entries(&merged)?;

                current.set_left_link(PageId::INVALID);
                current.set_entries(&[])?;

                self.write_page(left_id, left.as_bytes())?;
                self.buffer.unpin(left_id, true)?;
                self.write_page(current_id, current.as_bytes())?;
                self.buffer.unpin(current_id, true)?;
                self.buffer.unpin(parent_id, false)?;
                self.buffer.free(current_id)?;

                debug!(%current_id, into = %left_id, "index merged into left sibling");
                return Ok(Some((anchor, current_id)));
            }
            self.buffer.unpin(left_id, false)?;
        }

        // Merge the right sibling into this page
        if let Some(right_id) = right_id {
            self.buffer.pin(right_id)?;
            let mut right = self.read_index(right_id)?;
            if right.slot_count() <= HALF_INDEX_PAGE_CAPACITY {
                let donor_link = right.left_link();
                let anchor = self.smallest_key_in_subtree(donor_link)?;

                let mut merged = current.entries()?;
                merged.push((anchor.clone(), donor_link));
                merged.extend(right.entries()?);
                current.set_entries(&merged)?;

                right.set_left_link(PageId::INVALID);
                right.set_entries(&[])?;

                self.write_page(current_id, current.as_bytes())?;
                self.buffer.unpin(current_id, true)?;
                self.write_page(right_id, right.as_bytes())?;
                self.buffer.unpin(right_id, true)?;
                self.buffer.unpin(parent_id, false)?;
                self.buffer.free(right_id)?;

                debug!(merged = %right_id, into = %current_id, "right index sibling merged in");
                return Ok(Some((anchor, right_id)));
            }
            self.buffer.unpin(right_id, false)?;
        }

        self.write_page(current_id, current.as_bytes())?;
        self.buffer.unpin(current_id, true)?;
        self.buffer.unpin(parent_id, false)?;
        warn!(%current_id, "index page left under-filled, no eligible sibling");
        Ok(None)
    }

    /// Returns the smallest key stored in the subtree rooted at `page_id`,
    /// walking left-links down to the leftmost non-empty leaf.
    fn smallest_key_in_subtree(&self, page_id: PageId) -> Result<IndexKey> {
        let mut current = page_id;
        loop {
            self.buffer.pin(current)?;
            match self.node_kind(current)? {
                NodeKind::Index => {
                    let index = self.read_index(current)?;
                    let next = index.left_link();
                    self.buffer.unpin(current, false)?;
                    current = next;
                }
                NodeKind::Leaf => {
                    let leaf = self.read_leaf(current)?;
                    if let Some(key) = leaf.first_key()? {
                        self.buffer.unpin(current, false)?;
                        return Ok(key);
                    }
                    let next = leaf.next_page();
                    self.buffer.unpin(current, false)?;
                    if !next.is_valid() {
                        return Err(OrchardError::Corrupted(format!(
                            "subtree {page_id} holds no keys"
                        )));
                    }
                    current = next;
                }
                NodeKind::Header => {
                    self.buffer.unpin(current, false)?;
                    return Err(OrchardError::InvalidNodeType);
                }
            }
        }
    }

    // =========================================================================
    // Scan entry point
    // =========================================================================

    /// Locates the leftmost leaf slot with key >= `lo_key`, going all the
    /// way left when `lo_key` is None.
    ///
    /// Walks with a single pin held, transferring it from parent to child.
    /// Empty leaves along the way are skipped via next links. The returned
    /// leaf is pinned; releasing it is the caller's responsibility.
    fn find_run_start(&self, lo_key: Option<&IndexKey>) -> Result<Option<(PageId, usize)>> {
        let mut page_id = self.header.root_id();
        if !page_id.is_valid() {
            return Ok(None);
        }
        self.buffer.pin(page_id)?;
        trace!(node = %page_id, "visit");

        loop {
            match self.node_kind(page_id)? {
                NodeKind::Index => {
                    let index = self.read_index(page_id)?;
                    // Follow the last child whose separator is below the
                    // bound; duplicates are found by going left
                    let mut child = index.left_link();
                    if let Some(lo) = lo_key {
                        for (sep, c) in index.entries()? {
                            if key_compare(&sep, lo) != Ordering::Less {
                                break;
                            }
                            child = c;
                        }
                    }
                    self.buffer.unpin(page_id, false)?;
                    page_id = child;
                    self.buffer.pin(page_id)?;
                    trace!(node = %page_id, "visit");
                }
                NodeKind::Leaf => break,
                NodeKind::Header => {
                    self.buffer.unpin(page_id, false)?;
                    return Err(OrchardError::InvalidNodeType);
                }
            }
        }

        // Skip empty leaves off to the left
        let mut leaf = self.read_leaf(page_id)?;
        while leaf.is_empty() {
            let next = leaf.next_page();
            self.buffer.unpin(page_id, false)?;
            if !next.is_valid() {
                return Ok(None);
            }
            page_id = next;
            self.buffer.pin(page_id)?;
            leaf = self.read_leaf(page_id)?;
        }

        let Some(lo) = lo_key else {
            return Ok(Some((page_id, 0)));
        };

        // Advance to the first entry at or above the bound
        let mut slot = 0;
        loop {
            match leaf.entry_at(slot)? {
                Some((key, _)) => {
                    if key_compare(&key, lo) != Ordering::Less {
                        return Ok(Some((page_id, slot)));
                    }
                    slot += 1;
                }
                None => {
                    let next = leaf.next_page();
                    self.buffer.unpin(page_id, false)?;
                    if !next.is_valid() {
                        return Ok(None);
                    }
                    page_id = next;
                    self.buffer.pin(page_id)?;
                    leaf = self.read_leaf(page_id)?;
                    slot = 0;
                }
            }
        }
    }

    /// Opens a scan over `[lo_key, hi_key]`; either bound may be None for
    /// an open end. The returned scan holds the starting leaf pinned.
    pub fn new_scan(
        &self,
        lo_key: Option<&IndexKey>,
        hi_key: Option<&IndexKey>,
    ) -> Result<BTreeScan> {
        if let Some(lo) = lo_key {
            self.check_key(lo)?;
        }
        if let Some(hi) = hi_key {
            self.check_key(hi)?;
        }
        let start = self.find_run_start(lo_key)?;
        BTreeScan::open(
            Arc::clone(&self.buffer),
            self.key_type,
            start,
            hi_key.cloned(),
        )
    }

    // =========================================================================
    // Integrity checking
    // =========================================================================

    /// Walks the whole tree verifying its structural invariants: key
    /// order, separator ranges, the leaf sibling chain, uniform leaf
    /// depth, and (under the FULL policy) the occupancy floor.
    pub fn validate(&self) -> Result<TreeInfo> {
        let root = self.header.root_id();
        if !root.is_valid() {
            return Ok(TreeInfo::default());
        }

        let mut leaves = Vec::new();
        let mut leaf_depths = Vec::new();
        let entry_count = self.validate_node(root, None, None, true, 1, &mut leaves, &mut leaf_depths)?;

        let height = leaf_depths.first().copied().unwrap_or(0);
        if leaf_depths.iter().any(|&d| d != height) {
            return Err(OrchardError::Corrupted("leaves at differing depths".to_string()));
        }

        // The sibling chain must traverse exactly the leaves found under
        // the root, in order, with mutual prev/next links
        let mut chain = Vec::new();
        let mut prev = PageId::INVALID;
        let mut current = *leaves.first().unwrap_or(&PageId::INVALID);
        let mut occupancy = Vec::new();
        while current.is_valid() {
            self.buffer.pin(current)?;
            let leaf = self.read_leaf(current)?;
            if leaf.prev_page() != prev {
                self.buffer.unpin(current, false)?;
                return Err(OrchardError::Corrupted(format!(
                    "broken prev link at {current}"
                )));
            }
            chain.push(current);
            occupancy.push(leaf.slot_count());
            prev = current;
            current = leaf.next_page();
            self.buffer.unpin(prev, false)?;
        }
        if chain != leaves {
            return Err(OrchardError::Corrupted(
                "sibling chain disagrees with the tree structure".to_string(),
            ));
        }

        Ok(TreeInfo {
            height,
            entry_count,
            leaf_occupancy: occupancy,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_node(
        &self,
        page_id: PageId,
        lower: Option<&IndexKey>,
        upper: Option<&IndexKey>,
        is_root: bool,
        depth: usize,
        leaves: &mut Vec<PageId>,
        leaf_depths: &mut Vec<usize>,
    ) -> Result<usize> {
        self.buffer.pin(page_id)?;
        match self.node_kind(page_id)? {
            NodeKind::Leaf => {
                let leaf = self.read_leaf(page_id)?;
                let entries = leaf.entries()?;
                self.buffer.unpin(page_id, false)?;

                for window in entries.windows(2) {
                    if key_compare(&window[0].0, &window[1].0) == Ordering::Greater {
                        return Err(OrchardError::Corrupted(format!(
                            "keys out of order on {page_id}"
                        )));
                    }
                }
                for (key, _) in &entries {
                    if let Some(lo) = lower {
                        if key_compare(key, lo) == Ordering::Less {
                            return Err(OrchardError::Corrupted(format!(
                                "key below separator range on {page_id}"
                            )));
                        }
                    }
                    if let Some(hi) = upper {
                        if key_compare(key, hi) != Ordering::Less {
                            return Err(OrchardError::Corrupted(format!(
                                "key above separator range on {page_id}"
                            )));
                        }
                    }
                }
                if !is_root
                    && self.policy == DeletePolicy::Full
                    && entries.len() < HALF_LEAF_PAGE_CAPACITY
                {
                    return Err(OrchardError::Corrupted(format!(
                        "leaf {page_id} below the occupancy floor"
                    )));
                }
                leaves.push(page_id);
                leaf_depths.push(depth);
                Ok(entries.len())
            }
            NodeKind::Index => {
                let index = self.read_index(page_id)?;
                let entries = index.entries()?;
                let left_link = index.left_link();
                self.buffer.unpin(page_id, false)?;

                if !left_link.is_valid() {
                    return Err(OrchardError::Corrupted(format!(
                        "index page {page_id} has no left-link"
                    )));
                }
                for window in entries.windows(2) {
                    if key_compare(&window[0].0, &window[1].0) == Ordering::Greater {
                        return Err(OrchardError::Corrupted(format!(
                            "separators out of order on {page_id}"
                        )));
                    }
                }
                if !is_root
                    && self.policy == DeletePolicy::Full
                    && entries.len() < HALF_INDEX_PAGE_CAPACITY
                {
                    return Err(OrchardError::Corrupted(format!(
                        "index page {page_id} below the occupancy floor"
                    )));
                }

                let mut count = 0;
                let first_sep = entries.first().map(|(k, _)| k.clone());
                count += self.validate_node(
                    left_link,
                    lower,
                    first_sep.as_ref().or(upper),
                    false,
                    depth + 1,
                    leaves,
                    leaf_depths,
                )?;
                for (i, (sep, child)) in entries.iter().enumerate() {
                    let next_sep = entries.get(i + 1).map(|(k, _)| k);
                    count += self.validate_node(
                        *child,
                        Some(sep),
                        next_sep.or(upper),
                        false,
                        depth + 1,
                        leaves,
                        leaf_depths,
                    )?;
                }
                Ok(count)
            }
            NodeKind::Header => {
                self.buffer.unpin(page_id, false)?;
                Err(OrchardError::InvalidNodeType)
            }
        }
    }

    // =========================================================================
    // Page access helpers
    // =========================================================================

    fn check_key(&self, key: &IndexKey) -> Result<()> {
        if key.key_type() != self.key_type {
            return Err(OrchardError::KeyTypeMismatch {
                expected: self.key_type.to_string(),
                actual: key.key_type().to_string(),
            });
        }
        let len = key.encoded_len();
        if len > self.max_key_size as usize {
            return Err(OrchardError::KeyTooLong {
                size: len,
                max: self.max_key_size as usize,
            });
        }
        Ok(())
    }

    /// Re-pins the header, records the new root, and unpins it dirty.
    fn update_header(&mut self, new_root: PageId) -> Result<()> {
        self.buffer.pin(self.header_id)?;
        self.header.set_root_id(new_root);
        let bytes = *self.header.as_bytes();
        self.buffer.write(self.header_id, |data| data.copy_from_slice(&bytes))?;
        self.buffer.unpin(self.header_id, true)?;
        Ok(())
    }

    fn node_kind(&self, page_id: PageId) -> Result<NodeKind> {
        self.buffer
            .read(page_id, |data| SortedPage::from_bytes(data).kind())?
    }

    fn read_leaf(&self, page_id: PageId) -> Result<LeafPage> {
        self.buffer
            .read(page_id, |data| LeafPage::from_bytes(data, self.key_type))?
    }

    fn read_index(&self, page_id: PageId) -> Result<IndexPage> {
        self.buffer
            .read(page_id, |data| IndexPage::from_bytes(data, self.key_type))?
    }

    fn write_page(&self, page_id: PageId, bytes: &[u8; PAGE_SIZE]) -> Result<()> {
        self.buffer.write(page_id, |data| data.copy_from_slice(bytes))
    }
}

impl Drop for BTreeFile {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.buffer.unpin(self.header_id, true);
        }
    }
}

/// Shape summary returned by [`BTreeFile::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeInfo {
    /// Number of levels, 0 for an empty tree.
    pub height: usize,
    /// Total entries stored.
    pub entry_count: usize,
    /// Entries per leaf, left to right.
    pub leaf_occupancy: Vec<usize>,
}

fn leaf_space(entries: &[(IndexKey, Rid)]) -> usize {
    let used: usize = entries
        .iter()
        .map(|(key, _)| entry_len(key, NodeKind::Leaf) + SLOT_SIZE)
        .sum();
    PAGE_SIZE - NodeHeader::SIZE - used
}

fn insert_sorted_leaf(entries: &mut Vec<(IndexKey, Rid)>, key: IndexKey, rid: Rid) {
    let pos = entries
        .iter()
        .take_while(|(k, _)| key_compare(k, &key) != Ordering::Greater)
        .count();
    entries.insert(pos, (key, rid));
}

fn insert_sorted_index(entries: &mut Vec<(IndexKey, PageId)>, key: IndexKey, child: PageId) {
    let pos = entries
        .iter()
        .take_while(|(k, _)| key_compare(k, &key) != Ordering::Greater)
        .count();
    entries.insert(pos, (key, child));
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchard_common::config::{BufferManagerConfig, DiskManagerConfig};
    use tempfile::tempdir;

    fn setup(policy: DeletePolicy) -> (BTreeFile, Arc<BufferManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            orchard_buffer::DiskManager::new(DiskManagerConfig {
                path: dir.path().join("index.dat"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let catalog = Arc::new(Catalog::new(Arc::clone(&disk)).unwrap());
        let buffer = Arc::new(BufferManager::new(disk, BufferManagerConfig { num_frames: 256 }));
        let tree = BTreeFile::create_or_open(
            Arc::clone(&buffer),
            catalog,
            "test_index",
            KeyType::Int,
            4,
            policy,
        )
        .unwrap();
        (tree, buffer, dir)
    }

    fn int(v: i32) -> IndexKey {
        IndexKey::Int(v)
    }

    fn rid(n: u32) -> Rid {
        Rid::new(PageId(500), n)
    }

    #[test]
    fn test_insert_into_empty_tree() {
        let (mut tree, _buffer, _dir) = setup(DeletePolicy::Full);

        assert_eq!(tree.root_id(), PageId::INVALID);
        tree.insert(&int(42), rid(1)).unwrap();
        assert!(tree.root_id().is_valid());

        let info = tree.validate().unwrap();
        assert_eq!(info.height, 1);
        assert_eq!(info.entry_count, 1);
    }

    #[test]
    fn test_key_type_mismatch() {
        let (mut tree, _buffer, _dir) = setup(DeletePolicy::Full);
        let result = tree.insert(&IndexKey::Str("oops".to_string()), rid(1));
        assert!(matches!(result, Err(OrchardError::KeyTypeMismatch { .. })));
    }

    #[test]
    fn test_key_too_long() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            orchard_buffer::DiskManager::new(DiskManagerConfig {
                path: dir.path().join("index.dat"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let catalog = Arc::new(Catalog::new(Arc::clone(&disk)).unwrap());
        let buffer = Arc::new(BufferManager::new(disk, BufferManagerConfig { num_frames: 64 }));
        let mut tree = BTreeFile::create_or_open(
            buffer,
            catalog,
            "str_index",
            KeyType::Str,
            8,
            DeletePolicy::Naive,
        )
        .unwrap();

        tree.insert(&IndexKey::Str("ok".to_string()), rid(1)).unwrap();
        let result = tree.insert(&IndexKey::Str("definitely too long".to_string()), rid(2));
        assert!(matches!(result, Err(OrchardError::KeyTooLong { .. })));
    }

    #[test]
    fn test_no_pins_leak_across_operations() {
        let (mut tree, buffer, _dir) = setup(DeletePolicy::Full);

        for v in 0..500 {
            tree.insert(&int(v), rid(v as u32)).unwrap();
        }
        for v in 0..250 {
            assert!(tree.delete(&int(v), rid(v as u32)).unwrap());
        }
        let mut scan = tree.new_scan(Some(&int(300)), Some(&int(310))).unwrap();
        while scan.next().unwrap().is_some() {}
        drop(scan);

        // Only the header's lifetime pin may remain
        assert_eq!(buffer.stats().pinned_frames, 1);
    }

    #[test]
    fn test_find_run_start_positions() {
        let (mut tree, _buffer, _dir) = setup(DeletePolicy::Full);
        for v in [10, 20, 30, 40, 50] {
            tree.insert(&int(v), rid(v as u32)).unwrap();
        }

        // Between keys: lands on the next larger key
        let (leaf_id, slot) = tree.find_run_start(Some(&int(25))).unwrap().unwrap();
        let leaf = tree.read_leaf(leaf_id).unwrap();
        assert_eq!(leaf.entry_at(slot).unwrap().unwrap().0, int(30));
        tree.buffer.unpin(leaf_id, false).unwrap();

        // Above every key: nothing to scan
        assert!(tree.find_run_start(Some(&int(99))).unwrap().is_none());
    }

    #[test]
    fn test_smallest_key_in_subtree() {
        let (mut tree, _buffer, _dir) = setup(DeletePolicy::Full);
        for v in (1..=200).rev() {
            tree.insert(&int(v), rid(v as u32)).unwrap();
        }
        let smallest = tree.smallest_key_in_subtree(tree.root_id()).unwrap();
        assert_eq!(smallest, int(1));
    }

    #[test]
    fn test_validate_catches_broken_sibling_chain() {
        let (mut tree, buffer, _dir) = setup(DeletePolicy::Full);
        for v in 0..200 {
            tree.insert(&int(v), rid(v as u32)).unwrap();
        }
        tree.validate().unwrap();

        // Corrupt a leaf's prev pointer behind the tree's back
        let (leaf_id, _) = tree.find_run_start(Some(&int(150))).unwrap().unwrap();
        let mut leaf = tree.read_leaf(leaf_id).unwrap();
        leaf.set_prev_page(PageId(999));
        let bytes = *leaf.as_bytes();
        buffer.write(leaf_id, |data| data.copy_from_slice(&bytes)).unwrap();
        buffer.unpin(leaf_id, true).unwrap();

        assert!(matches!(
            tree.validate(),
            Err(OrchardError::Corrupted(_))
        ));
    }
}
