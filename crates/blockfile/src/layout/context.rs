use std::rc::Weak;

use blockfile_store::BackingStore;

use crate::address::{align_up, INVALID_WORD, WORD_SIZE};
use crate::block_ref::BlockRef;
use crate::error::{BlockError, BlockResult};
use crate::manager::{BlockManager, CommitPass, ManagerInner};

use super::{Layout, MAX_ZERO_SIZED_ELEMENTS};

/// Running size computation for [`Layout::measure`].
#[derive(Debug, Default)]
pub struct MeasureContext {
    cursor: usize,
}

impl MeasureContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pad to `align`, then account for `size` bytes.
    pub fn reserve(&mut self, align: usize, size: usize) {
        self.cursor = align_up(self.cursor, align) + size;
    }

    /// Account for `count` elements of `size` bytes each aligned to `align`.
    pub fn reserve_array(&mut self, align: usize, size: usize, count: usize) {
        if count > 0 {
            self.reserve(align, super::array_size(size, align, count));
        }
    }

    pub fn align_to(&mut self, align: usize) {
        self.cursor = align_up(self.cursor, align);
    }

    pub fn size(&self) -> usize {
        self.cursor
    }
}

enum Sink<'a> {
    Buffer(&'a mut [u8]),
    Block {
        manager: &'a BlockManager,
        pass: &'a mut CommitPass,
        /// Store offset of the payload's first byte.
        base: u64,
    },
}

/// Encoding cursor for [`Layout::save`].
///
/// Inside a commit the target is a block payload in the store. Each write
/// acquires its own window, so a nested commit triggered by a reference
/// field may grow and remap the store between two writes.
pub struct SaveContext<'a> {
    sink: Sink<'a>,
    origin: u64,
    length: usize,
    cursor: usize,
}

impl<'a> SaveContext<'a> {
    pub(crate) fn for_buffer(buf: &'a mut [u8]) -> Self {
        let length = buf.len();
        Self {
            sink: Sink::Buffer(buf),
            origin: 0,
            length,
            cursor: 0,
        }
    }

    /// Target the payload of the block whose length prefix sits at `offset`.
    pub(crate) fn for_block(
        manager: &'a BlockManager,
        pass: &'a mut CommitPass,
        offset: u64,
        length: usize,
    ) -> Self {
        Self {
            sink: Sink::Block {
                manager,
                pass,
                base: offset + WORD_SIZE as u64,
            },
            origin: offset,
            length,
            cursor: 0,
        }
    }

    /// Bytes written so far, padding included.
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn mismatch(&self, reason: String) -> BlockError {
        BlockError::SizeMismatch {
            offset: self.origin,
            reason,
        }
    }

    /// Skip padding up to `align`. Padding bytes stay zero.
    pub fn align_to(&mut self, align: usize) -> BlockResult<()> {
        let aligned = align_up(self.cursor, align);
        if aligned > self.length {
            return Err(self.mismatch(format!(
                "padding to {aligned} past declared length {}",
                self.length
            )));
        }
        self.cursor = aligned;
        Ok(())
    }

    /// Pad to `align` and hand `f` a window of exactly `size` bytes.
    pub fn write_with<F>(&mut self, align: usize, size: usize, f: F) -> BlockResult<()>
    where
        F: FnOnce(&mut [u8]) -> BlockResult<()>,
    {
        let start = align_up(self.cursor, align);
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.length)
            .ok_or_else(|| {
                self.mismatch(format!(
                    "write of {size} bytes at {start} past declared length {}",
                    self.length
                ))
            })?;
        match &mut self.sink {
            Sink::Buffer(buf) => f(&mut buf[start..end])?,
            Sink::Block { manager, base, .. } => {
                let mut store = manager.store_mut()?;
                let window = store.window_mut(*base + start as u64, size as u64)?;
                f(window)?;
            }
        }
        self.cursor = end;
        Ok(())
    }

    pub fn write_bytes(&mut self, align: usize, bytes: &[u8]) -> BlockResult<()> {
        self.write_with(align, bytes.len(), |out| {
            out.copy_from_slice(bytes);
            Ok(())
        })
    }

    /// Write an aligned little-endian word.
    pub fn write_word(&mut self, word: u64) -> BlockResult<()> {
        self.write_bytes(WORD_SIZE, &word.to_le_bytes())
    }

    /// Write the element count of a sequence of `T`, refusing counts that
    /// could not be read back.
    pub fn write_count<T: Layout>(&mut self, count: usize) -> BlockResult<()> {
        if T::KIND.min_size() == 0 && count > MAX_ZERO_SIZED_ELEMENTS {
            return Err(self.mismatch(format!(
                "{count} zero-sized elements exceed the limit of {MAX_ZERO_SIZED_ELEMENTS}"
            )));
        }
        self.write_word(count as u64)
    }

    /// Resolve `reference` to its on-disk word, committing the target first
    /// when it only exists in the overlay.
    pub fn commit_reference<T: Layout + 'static>(
        &mut self,
        reference: &BlockRef<T>,
    ) -> BlockResult<u64> {
        let address = reference.raw_address();
        match &mut self.sink {
            Sink::Buffer(_) => address.to_word().ok_or(BlockError::UncommittedReference),
            Sink::Block { manager, pass, .. } => {
                if address.is_invalid() {
                    return Ok(INVALID_WORD);
                }
                let manager: &BlockManager = manager;
                manager.check_owner(reference)?;
                manager.commit_address::<T>(address, pass)
            }
        }
    }

    /// Check that the whole declared length was produced.
    pub(crate) fn finish(self) -> BlockResult<()> {
        if self.cursor != self.length {
            return Err(self.mismatch(format!(
                "encoded {} bytes, declared {}",
                self.cursor, self.length
            )));
        }
        Ok(())
    }
}

/// Decoding cursor for [`Layout::load`].
pub struct LoadContext<'a> {
    data: &'a [u8],
    cursor: usize,
    origin: u64,
    manager: Option<Weak<ManagerInner>>,
}

impl<'a> LoadContext<'a> {
    /// Decode from `data`; `origin` is only used in error reports.
    pub(crate) fn new(data: &'a [u8], origin: u64, manager: Option<Weak<ManagerInner>>) -> Self {
        Self {
            data,
            cursor: 0,
            origin,
            manager,
        }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    pub(crate) fn mismatch(&self, reason: String) -> BlockError {
        BlockError::SizeMismatch {
            offset: self.origin,
            reason,
        }
    }

    pub fn align_to(&mut self, align: usize) -> BlockResult<()> {
        let aligned = align_up(self.cursor, align);
        if aligned > self.data.len() {
            return Err(self.mismatch(format!(
                "padding to {aligned} past declared length {}",
                self.data.len()
            )));
        }
        self.cursor = aligned;
        Ok(())
    }

    /// Pad to `align` and consume `size` bytes.
    pub fn take(&mut self, align: usize, size: usize) -> BlockResult<&'a [u8]> {
        let start = align_up(self.cursor, align);
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                self.mismatch(format!(
                    "read of {size} bytes at {start} past declared length {}",
                    self.data.len()
                ))
            })?;
        self.cursor = end;
        Ok(&self.data[start..end])
    }

    /// Read an aligned little-endian word.
    pub fn read_word(&mut self) -> BlockResult<u64> {
        let bytes = self.take(WORD_SIZE, WORD_SIZE)?;
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(word))
    }

    /// Read an element count and check the remaining bytes can hold that
    /// many elements of `T`.
    pub fn read_count<T: Layout>(&mut self) -> BlockResult<usize> {
        let count = self.read_word()?;
        self.check_count(count, T::KIND.min_size())
    }

    /// Validate a decoded `count` against the bytes left in the block.
    /// Zero-sized elements are capped at [`MAX_ZERO_SIZED_ELEMENTS`].
    pub fn check_count(&self, count: u64, min_element_size: usize) -> BlockResult<usize> {
        let fits = usize::try_from(count).ok().filter(|&n| match min_element_size {
            0 => n <= MAX_ZERO_SIZED_ELEMENTS,
            size => n
                .checked_mul(size)
                .is_some_and(|bytes| bytes <= self.remaining()),
        });
        fits.ok_or_else(|| {
            self.mismatch(format!(
                "count {count} exceeds the {} remaining bytes",
                self.remaining()
            ))
        })
    }

    /// Manager that decoded references will be bound to.
    pub(crate) fn manager(&self) -> Option<Weak<ManagerInner>> {
        self.manager.clone()
    }

    /// Check that the whole declared length was consumed.
    pub(crate) fn finish(&self) -> BlockResult<()> {
        if self.cursor != self.data.len() {
            return Err(self.mismatch(format!(
                "decoded {} bytes, declared {}",
                self.cursor,
                self.data.len()
            )));
        }
        Ok(())
    }
}
