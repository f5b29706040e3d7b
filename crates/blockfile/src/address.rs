use std::fmt;

use crate::error::{BlockError, BlockResult};

/// Size of a length prefix, count, tag or reference word, and the alignment
/// of every committed block.
pub const WORD_SIZE: usize = 8;

/// Serialized form of [`BlockAddress::Invalid`].
pub const INVALID_WORD: u64 = u64::MAX;

/// Round `value` up to a multiple of `alignment` (a power of two).
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// [`align_up`] for file offsets.
pub const fn align_up_u64(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Handle to an overlay slot.
///
/// The generation distinguishes successive occupants of the same index, so a
/// handle that outlived its slot never aliases a later allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub index: usize,
    pub generation: u64,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}#{}", self.index, self.generation)
    }
}

/// Where a block lives.
///
/// Only `Invalid` and `Committed` ever reach the disk, as a single word.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlockAddress {
    /// No block.
    #[default]
    Invalid,
    /// Word-aligned offset of the block's length prefix in the store.
    Committed(u64),
    /// A block that only exists in the in-memory overlay.
    Uncommitted(SlotId),
}

impl BlockAddress {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    pub fn is_uncommitted(&self) -> bool {
        matches!(self, Self::Uncommitted(_))
    }

    /// Decode an on-disk address word.
    pub fn from_word(word: u64) -> BlockResult<Self> {
        if word == INVALID_WORD {
            Ok(Self::Invalid)
        } else if word % WORD_SIZE as u64 == 0 {
            Ok(Self::Committed(word))
        } else {
            Err(BlockError::InvalidAddress(word))
        }
    }

    /// Encode as an on-disk word. Uncommitted addresses have no on-disk form.
    pub fn to_word(&self) -> Option<u64> {
        match self {
            Self::Invalid => Some(INVALID_WORD),
            Self::Committed(offset) => Some(*offset),
            Self::Uncommitted(_) => None,
        }
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Committed(offset) => write!(f, "@{offset:#x}"),
            Self::Uncommitted(slot) => write!(f, "{slot}"),
        }
    }
}
