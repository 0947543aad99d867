//! B+ tree index for Orchard.
//!
//! This crate provides a disk-resident B+ tree over fixed-size pages managed
//! by the `orchard-buffer` pool:
//! - Typed page views (sorted, leaf, index, header) over raw page buffers
//! - Recursive insert with node splits and separator promotion
//! - Naive and full (redistribute/merge) delete policies
//! - Bounded range scans over the leaf sibling chain

mod btree;

pub use btree::constants::{
    MAGIC, MAX_INDEX_PAGE_CAPACITY, MAX_KEY_SIZE, MAX_LEAF_PAGE_CAPACITY,
};
pub use btree::file::{BTreeFile, TreeInfo};
pub use btree::header::{DeletePolicy, HeaderPage};
pub use btree::key::{key_compare, IndexKey, KeyType, Rid};
pub use btree::page::{IndexPage, LeafPage, NodeKind, SortedPage};
pub use btree::scan::BTreeScan;
