//! Path catalog
//!
//! Maps file paths to entry metadata: size, content block list, and the
//! single timestamp attribute stamped at open. The catalog is serialized
//! as JSON with a length prefix and crc32 into the reserved catalog
//! region; a blank or torn region fails the checksum and routes the mount
//! through the format path.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute tag for the open timestamp
pub const ATTR_TIMESTAMP: u8 = b't';

/// Attribute value size in bytes
pub const ATTR_SIZE: usize = 4;

/// One custom file attribute (fixed 4-byte value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttr {
    pub tag: u8,
    pub value: [u8; ATTR_SIZE],
}

impl FileAttr {
    /// Timestamp attribute: tag `'t'`, little-endian Unix time
    pub fn timestamp(time: u32) -> Self {
        FileAttr {
            tag: ATTR_TIMESTAMP,
            value: time.to_le_bytes(),
        }
    }

    /// Decode the value as a timestamp, if this is a `'t'` attribute
    pub fn as_timestamp(&self) -> Option<u32> {
        (self.tag == ATTR_TIMESTAMP).then(|| u32::from_le_bytes(self.value))
    }
}

/// Catalog entry for one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Content length in bytes
    pub size: u64,

    /// Content blocks in file order
    pub blocks: Vec<u32>,

    /// Timestamp attribute, refreshed at every open
    pub attr: FileAttr,
}

/// Path → entry map for one volume
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Catalog {
    entries: HashMap<String, EntryMeta>,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn get(&self, path: &str) -> Option<&EntryMeta> {
        self.entries.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut EntryMeta> {
        self.entries.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Insert an entry, returning the displaced one if the path existed
    pub fn insert(&mut self, path: String, meta: EntryMeta) -> Option<EntryMeta> {
        self.entries.insert(path, meta)
    }

    pub fn remove(&mut self, path: &str) -> Option<EntryMeta> {
        self.entries.remove(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All content blocks referenced by any entry
    pub fn allocated_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.values().flat_map(|meta| meta.blocks.iter().copied())
    }

    /// Serialize to the on-flash image: length, crc32, JSON body
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(&self.entries)?;
        let mut out = Vec::with_capacity(8 + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse an on-flash image
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(Error::ChecksumMismatch);
        }
        let len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        let crc_stored = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

        // a blank (erased) region decodes to an absurd length
        if len > data.len() - 8 {
            return Err(Error::ChecksumMismatch);
        }

        let body = &data[8..8 + len];
        if crc32fast::hash(body) != crc_stored {
            return Err(Error::ChecksumMismatch);
        }

        let entries: HashMap<String, EntryMeta> = serde_json::from_slice(body)?;
        Ok(Catalog { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert(
            "save0".to_string(),
            EntryMeta {
                size: 5000,
                blocks: vec![3, 4],
                attr: FileAttr::timestamp(1_700_000_000),
            },
        );
        catalog.insert(
            "save1".to_string(),
            EntryMeta {
                size: 10,
                blocks: vec![7],
                attr: FileAttr::timestamp(1_700_000_100),
            },
        );
        catalog
    }

    #[test]
    fn test_attr_round_trip() {
        let attr = FileAttr::timestamp(1_700_000_000);
        assert_eq!(attr.tag, b't');
        assert_eq!(attr.value.len(), 4);
        assert_eq!(attr.as_timestamp(), Some(1_700_000_000));

        let other = FileAttr {
            tag: b'x',
            value: [0; 4],
        };
        assert_eq!(other.as_timestamp(), None);
    }

    #[test]
    fn test_image_round_trip() {
        let catalog = sample();
        let image = catalog.to_bytes().unwrap();
        let parsed = Catalog::from_bytes(&image).unwrap();

        assert_eq!(parsed.len(), 2);
        let entry = parsed.get("save0").unwrap();
        assert_eq!(entry.size, 5000);
        assert_eq!(entry.blocks, vec![3, 4]);
        assert_eq!(entry.attr.as_timestamp(), Some(1_700_000_000));
    }

    #[test]
    fn test_blank_region_rejected() {
        let blank = vec![0xFFu8; 4096];
        assert!(matches!(
            Catalog::from_bytes(&blank),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_corrupt_body_rejected() {
        let mut image = sample().to_bytes().unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        assert!(matches!(
            Catalog::from_bytes(&image),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_allocated_blocks() {
        let catalog = sample();
        let mut blocks: Vec<u32> = catalog.allocated_blocks().collect();
        blocks.sort_unstable();
        assert_eq!(blocks, vec![3, 4, 7]);
    }

    #[test]
    fn test_insert_displaces() {
        let mut catalog = sample();
        let old = catalog.insert(
            "save1".to_string(),
            EntryMeta {
                size: 0,
                blocks: vec![],
                attr: FileAttr::timestamp(1),
            },
        );
        assert_eq!(old.unwrap().blocks, vec![7]);
    }
}
