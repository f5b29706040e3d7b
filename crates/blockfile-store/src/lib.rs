//! Backing store for the blockfile storage engine.
//!
//! A backing store is a growable run of bytes with windowed direct access.
//! The block manager in the `blockfile` crate allocates monotonically at the
//! end of the store and reads and writes blocks through short-lived windows.
//!
//! # Backends
//!
//! All backends implement the [`BackingStore`] trait:
//!
//! - [`FileStore`] -- a file accessed through memory-mapped views
//! - [`MemoryStore`] -- a `Vec<u8>` for tests and embedding
//!
//! # Window contract
//!
//! 1. At most one window is active at a time; a window mutably borrows the
//!    store, so the borrow checker rejects holding it across another store call.
//! 2. Windows are only handed out for ranges inside `[0, size())`.
//! 3. `resize` may remap the file; previously obtained windows are gone.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod config;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use config::{AccessMode, CreateMode, ShareMode, StoreConfig, DEFAULT_VIEW_GRANULARITY};
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use traits::{check_range, BackingStore};
