//! In-memory state of a [`BlockManager`](crate::BlockManager): decoded
//! committed blocks and the overlay of uncommitted ones.

mod committed;
mod overlay;

pub use committed::CommittedCache;
pub use overlay::{NewBlockCache, RetiredBlock};

/// Both halves of the block cache, guarded together by the manager.
#[derive(Debug, Default)]
pub struct BlockCache {
    pub committed: CommittedCache,
    pub overlay: NewBlockCache,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all committed entries and empty the overlay. Returns the
    /// released instances for the caller to drop.
    pub fn reset(&mut self) -> Vec<RetiredBlock> {
        self.committed.clear();
        self.overlay.reset()
    }
}
