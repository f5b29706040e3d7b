//! Copy-on-write persistence of typed record graphs inside a single file.
//!
//! A store holds a header and an append-only sequence of length-prefixed
//! blocks. Each block is one record; records reference each other with
//! [`BlockRef`]s, which are stored as file offsets. Graphs may share nodes
//! and contain cycles.
//!
//! # Working with blocks
//!
//! - [`BlockManager::read`] gives shared access to a block. Committed blocks
//!   are decoded on first access and shared while any reader holds them.
//! - [`BlockManager::write`] gives mutable access to a private copy kept in
//!   the in-memory overlay; the committed block is never modified.
//! - [`BlockManager::commit`] appends every overlay block reachable from a
//!   root, writing each exactly once, and then points the header at the
//!   root.
//!
//! Record types describe their binary form through [`Layout`], usually
//! generated with [`block_layout!`]:
//!
//! ```
//! use blockfile::{block_layout, BlockManager, BlockRef};
//! use blockfile_store::MemoryStore;
//!
//! block_layout! {
//!     #[derive(Debug, Default)]
//!     pub struct Entry {
//!         pub key: String,
//!         pub next: BlockRef<Entry>,
//!     }
//! }
//!
//! # fn main() -> blockfile::BlockResult<()> {
//! let manager = BlockManager::new(MemoryStore::new());
//! manager.format()?;
//!
//! let mut head = manager.new_ref::<Entry>();
//! head.write()?.borrow_mut().key = "first".into();
//! head.commit()?;
//!
//! let root = manager.root::<Entry>()?;
//! assert_eq!(root.read()?.borrow().key, "first");
//! # Ok(())
//! # }
//! ```
//!
//! # Design Rules
//!
//! 1. Committed blocks are immutable; writes go to an overlay copy.
//! 2. The header is rewritten only after all blocks of a commit are written.
//! 3. A failed commit restores the overlay and leaves the header untouched.
//! 4. Everything is single-threaded; handles are neither `Send` nor `Sync`.

pub mod address;
pub mod block_ref;
pub mod cache;
pub mod config;
pub mod error;
pub mod layout;
pub mod manager;
pub mod meta;

#[cfg(test)]
mod scenarios;

// Re-export primary types at crate root for ergonomic imports.
pub use address::{BlockAddress, SlotId, WORD_SIZE};
pub use block_ref::{BlockPtr, BlockPtrMut, BlockRef};
pub use config::{ManagerConfig, SyncMode};
pub use error::{BlockError, BlockResult};
pub use layout::{
    decode_from_slice, encode_to_vec, encoded_size, Layout, LayoutKind, LoadContext,
    MeasureContext, SaveContext,
};
pub use manager::{BlockInfo, BlockManager, ManagerStats};
pub use meta::{MetaInfo, HEADER_SIZE};
