use crate::error::{StoreError, StoreResult};

/// Growable byte storage with windowed direct access.
///
/// All implementations must satisfy these invariants:
/// - At most one window is active at a time. A window borrows the store
///   mutably, so it cannot outlive the next `window`, `window_mut` or
///   `resize` call.
/// - Windows are only handed out for ranges inside `[0, size())`.
/// - `resize` may grow or truncate; grown space reads as zeroes.
/// - All I/O errors are propagated, never silently ignored.
pub trait BackingStore {
    /// Current size of the store in bytes.
    fn size(&self) -> u64;

    /// Grow or truncate the store to exactly `new_size` bytes.
    fn resize(&mut self, new_size: u64) -> StoreResult<()>;

    /// Read-only view of `length` bytes starting at `offset`.
    fn window(&mut self, offset: u64, length: u64) -> StoreResult<&[u8]>;

    /// Writable view of `length` bytes starting at `offset`.
    fn window_mut(&mut self, offset: u64, length: u64) -> StoreResult<&mut [u8]>;

    /// Persist outstanding writes to the underlying medium.
    fn flush(&mut self) -> StoreResult<()>;

    /// Whether `window_mut` and `resize` are rejected.
    fn is_read_only(&self) -> bool {
        false
    }
}

/// Validate that `offset..offset + length` lies inside a store of `size` bytes.
pub fn check_range(offset: u64, length: u64, size: u64) -> StoreResult<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StoreError::OutOfBounds {
            offset,
            length,
            size,
        }),
    }
}

impl<S: BackingStore + ?Sized> BackingStore for Box<S> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn resize(&mut self, new_size: u64) -> StoreResult<()> {
        (**self).resize(new_size)
    }

    fn window(&mut self, offset: u64, length: u64) -> StoreResult<&[u8]> {
        (**self).window(offset, length)
    }

    fn window_mut(&mut self, offset: u64, length: u64) -> StoreResult<&mut [u8]> {
        (**self).window_mut(offset, length)
    }

    fn flush(&mut self) -> StoreResult<()> {
        (**self).flush()
    }

    fn is_read_only(&self) -> bool {
        (**self).is_read_only()
    }
}
