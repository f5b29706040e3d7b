//! The fixed store header.
//!
//! ```text
//! [8 bytes: file size (little-endian u64)]
//! [8 bytes: root block address word (little-endian u64, u64::MAX = empty)]
//! ```

use crate::address::{BlockAddress, WORD_SIZE};
use crate::error::{BlockError, BlockResult};

/// Size of the header at offset 0.
pub const HEADER_SIZE: u64 = 16;

/// Store header: total file size and root block address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetaInfo {
    pub file_size: u64,
    pub root: BlockAddress,
}

impl MetaInfo {
    /// Header of a freshly formatted store.
    pub fn empty() -> Self {
        Self {
            file_size: HEADER_SIZE,
            root: BlockAddress::Invalid,
        }
    }

    /// Serialize to the on-disk form.
    pub fn to_bytes(&self) -> BlockResult<[u8; HEADER_SIZE as usize]> {
        let root = self.root.to_word().ok_or_else(|| {
            BlockError::MalformedHeader(format!("root {} is not committed", self.root))
        })?;
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[..WORD_SIZE].copy_from_slice(&self.file_size.to_le_bytes());
        buf[WORD_SIZE..].copy_from_slice(&root.to_le_bytes());
        Ok(buf)
    }

    /// Parse and validate a header read from a store of `store_size` bytes.
    pub fn from_bytes(data: &[u8], store_size: u64) -> BlockResult<Self> {
        if data.len() < HEADER_SIZE as usize || store_size < HEADER_SIZE {
            return Err(BlockError::MalformedHeader(format!(
                "store of {store_size} bytes is shorter than the header"
            )));
        }
        let file_size = word_at(data, 0)?;
        let root_word = word_at(data, WORD_SIZE)?;

        if file_size < HEADER_SIZE || file_size > store_size {
            return Err(BlockError::MalformedHeader(format!(
                "recorded file size {file_size} outside [{HEADER_SIZE}, {store_size}]"
            )));
        }
        let root = BlockAddress::from_word(root_word)
            .map_err(|_| BlockError::MalformedHeader(format!("root word {root_word:#x}")))?;
        if let BlockAddress::Committed(offset) = root {
            if offset < HEADER_SIZE || offset + WORD_SIZE as u64 > file_size {
                return Err(BlockError::MalformedHeader(format!(
                    "root offset {offset} outside recorded file size {file_size}"
                )));
            }
        }
        Ok(Self { file_size, root })
    }
}

/// Little-endian word at byte `at` of the header.
fn word_at(data: &[u8], at: usize) -> BlockResult<u64> {
    data.get(at..at + WORD_SIZE)
        .and_then(|bytes| <[u8; WORD_SIZE]>::try_from(bytes).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| BlockError::MalformedHeader(format!("truncated header word at {at}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header_roundtrip() {
        let meta = MetaInfo::empty();
        let bytes = meta.to_bytes().unwrap();
        assert_eq!(&bytes[8..], &[0xff; 8]);
        assert_eq!(MetaInfo::from_bytes(&bytes, HEADER_SIZE).unwrap(), meta);
    }

    #[test]
    fn committed_root_roundtrip() {
        let meta = MetaInfo {
            file_size: 64,
            root: BlockAddress::Committed(16),
        };
        let bytes = meta.to_bytes().unwrap();
        assert_eq!(MetaInfo::from_bytes(&bytes, 64).unwrap(), meta);
    }

    #[test]
    fn truncated_store() {
        let err = MetaInfo::from_bytes(&[0u8; 8], 8).unwrap_err();
        assert!(matches!(err, BlockError::MalformedHeader(_)));
    }

    #[test]
    fn header_words_are_bounds_checked() {
        let mut data = [0u8; 12];
        data[0] = 1;
        assert_eq!(word_at(&data, 0).unwrap(), 1);
        assert!(matches!(
            word_at(&data, WORD_SIZE).unwrap_err(),
            BlockError::MalformedHeader(_)
        ));
    }

    #[test]
    fn file_size_beyond_store() {
        let meta = MetaInfo {
            file_size: 128,
            root: BlockAddress::Invalid,
        };
        let err = MetaInfo::from_bytes(&meta.to_bytes().unwrap(), 64).unwrap_err();
        assert!(matches!(err, BlockError::MalformedHeader(_)));
    }

    #[test]
    fn misaligned_root() {
        let mut bytes = MetaInfo::empty().to_bytes().unwrap();
        bytes[8..].copy_from_slice(&19u64.to_le_bytes());
        let err = MetaInfo::from_bytes(&bytes, 64).unwrap_err();
        assert!(matches!(err, BlockError::MalformedHeader(_)));
    }

    #[test]
    fn root_inside_header() {
        let meta = MetaInfo {
            file_size: 64,
            root: BlockAddress::Committed(8),
        };
        let err = MetaInfo::from_bytes(&meta.to_bytes().unwrap(), 64).unwrap_err();
        assert!(matches!(err, BlockError::MalformedHeader(_)));
    }

    #[test]
    fn uncommitted_root_is_not_serializable() {
        let meta = MetaInfo {
            file_size: 16,
            root: BlockAddress::Uncommitted(crate::address::SlotId {
                index: 0,
                generation: 0,
            }),
        };
        assert!(meta.to_bytes().is_err());
    }
}
