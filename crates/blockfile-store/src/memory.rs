use crate::error::{StoreError, StoreResult};
use crate::traits::{check_range, BackingStore};

/// In-memory, `Vec`-backed store.
///
/// Intended for tests and embedding. Contents are lost when the store is
/// dropped unless extracted with [`MemoryStore::into_bytes`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Vec<u8>,
    read_only: bool,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store over existing bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            read_only: false,
        }
    }

    /// Create a read-only store over existing bytes.
    pub fn read_only(data: Vec<u8>) -> Self {
        Self {
            data,
            read_only: true,
        }
    }

    /// Borrow the full contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the store and return its contents.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}

impl BackingStore for MemoryStore {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn resize(&mut self, new_size: u64) -> StoreResult<()> {
        self.check_writable()?;
        let new_len = usize::try_from(new_size).map_err(|_| {
            StoreError::InvalidConfig(format!("size {new_size} exceeds address space"))
        })?;
        self.data.resize(new_len, 0);
        Ok(())
    }

    fn window(&mut self, offset: u64, length: u64) -> StoreResult<&[u8]> {
        check_range(offset, length, self.size())?;
        let start = offset as usize;
        Ok(&self.data[start..start + length as usize])
    }

    fn window_mut(&mut self, offset: u64, length: u64) -> StoreResult<&mut [u8]> {
        self.check_writable()?;
        check_range(offset, length, self.size())?;
        let start = offset as usize;
        Ok(&mut self.data[start..start + length as usize])
    }

    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("size", &self.data.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}
