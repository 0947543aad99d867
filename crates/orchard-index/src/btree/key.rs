//! Key types, record ids, and entry encoding.

use crate::btree::page::NodeKind;
use bytes::{BufMut, BytesMut};
use orchard_common::{OrchardError, PageId, Result};
use std::cmp::Ordering;

/// The key type a tree is declared with at creation.
///
/// All keys in one tree share a single type, recorded in the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyType {
    Int = 1,
    Str = 2,
}

impl KeyType {
    pub(crate) fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            1 => Ok(KeyType::Int),
            2 => Ok(KeyType::Str),
            _ => Err(OrchardError::Corrupted(format!("unknown key type {raw}"))),
        }
    }
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Int => write!(f, "INT"),
            KeyType::Str => write!(f, "STR"),
        }
    }
}

/// A typed index key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Int(i32),
    Str(String),
}

impl IndexKey {
    /// Returns the type of this key.
    pub fn key_type(&self) -> KeyType {
        match self {
            IndexKey::Int(_) => KeyType::Int,
            IndexKey::Str(_) => KeyType::Str,
        }
    }

    /// On-page encoded length of this key.
    pub fn encoded_len(&self) -> usize {
        match self {
            IndexKey::Int(_) => 4,
            IndexKey::Str(s) => 2 + s.len(),
        }
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            IndexKey::Int(v) => buf.put_i32_le(*v),
            IndexKey::Str(s) => {
                buf.put_u16_le(s.len() as u16);
                buf.put_slice(s.as_bytes());
            }
        }
    }

    /// Decodes a key from the front of `buf`. Returns the key and the number
    /// of bytes consumed.
    pub(crate) fn decode(buf: &[u8], key_type: KeyType) -> Result<(IndexKey, usize)> {
        match key_type {
            KeyType::Int => {
                if buf.len() < 4 {
                    return Err(OrchardError::Corrupted("truncated int key".to_string()));
                }
                let v = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                Ok((IndexKey::Int(v), 4))
            }
            KeyType::Str => {
                if buf.len() < 2 {
                    return Err(OrchardError::Corrupted("truncated string key".to_string()));
                }
                let len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
                if buf.len() < 2 + len {
                    return Err(OrchardError::Corrupted("truncated string key".to_string()));
                }
                let s = String::from_utf8(buf[2..2 + len].to_vec())
                    .map_err(|_| OrchardError::Corrupted("string key not utf-8".to_string()))?;
                Ok((IndexKey::Str(s), 2 + len))
            }
        }
    }
}

impl std::fmt::Display for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKey::Int(v) => write!(f, "{v}"),
            IndexKey::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Compares two keys of the same type.
pub fn key_compare(a: &IndexKey, b: &IndexKey) -> Ordering {
    a.cmp(b)
}

/// Identifier of a record stored outside the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_no: PageId,
    pub slot_no: u32,
}

impl Rid {
    /// On-page encoded length (page number + slot number).
    pub(crate) const ENCODED_LEN: usize = 8;

    pub fn new(page_no: PageId, slot_no: u32) -> Self {
        Self { page_no, slot_no }
    }

    pub(crate) fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.page_no.0);
        buf.put_u32_le(self.slot_no);
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(OrchardError::Corrupted("truncated rid".to_string()));
        }
        Ok(Self {
            page_no: PageId(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            slot_no: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

/// On-page length of a `(key, payload)` entry for a node kind.
pub(crate) fn entry_len(key: &IndexKey, kind: NodeKind) -> usize {
    let payload = match kind {
        NodeKind::Leaf => Rid::ENCODED_LEN,
        NodeKind::Index => 4,
        NodeKind::Header => 0,
    };
    key.encoded_len() + payload
}
