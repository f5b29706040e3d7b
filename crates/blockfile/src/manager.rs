//! The block manager: owns the backing store and the block cache, and
//! implements read, copy-on-write and commit over a graph of typed blocks.
//!
//! # File layout
//!
//! ```text
//! [header: file size, root address]   (HEADER_SIZE bytes at offset 0)
//! [block][pad][block][pad]...          (each block word-aligned)
//!
//! block = [8 bytes: payload length][payload]
//! ```
//!
//! Blocks are only ever appended. A commit writes every reachable
//! uncommitted block behind the current end of the file and then updates the
//! header, so the previous root stays valid until the header is rewritten.

use std::cell::{Ref, RefCell, RefMut};
use std::path::Path;
use std::rc::{Rc, Weak};

use blockfile_store::{BackingStore, FileStore, StoreConfig};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::address::{align_up_u64, BlockAddress, SlotId, INVALID_WORD, WORD_SIZE};
use crate::block_ref::{BlockPtr, BlockPtrMut, BlockRef};
use crate::cache::{BlockCache, RetiredBlock};
use crate::config::{ManagerConfig, SyncMode};
use crate::error::{BlockError, BlockResult};
use crate::layout::{self, Layout, LoadContext, SaveContext};
use crate::meta::{MetaInfo, HEADER_SIZE};

const WORD: u64 = WORD_SIZE as u64;

pub(crate) struct ManagerInner {
    store: RefCell<Box<dyn BackingStore>>,
    cache: RefCell<BlockCache>,
    config: ManagerConfig,
}

/// Slots committed by one commit call. Holds their instances until the
/// commit either succeeds (they are dropped) or fails (they are restored).
#[derive(Default)]
pub(crate) struct CommitPass {
    journal: Vec<(SlotId, RetiredBlock)>,
    bytes: u64,
}

/// Location of one block in the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Offset of the length prefix.
    pub offset: u64,
    /// Payload length, prefix excluded.
    pub length: u64,
}

/// Point-in-time counters of a [`BlockManager`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub file_size: u64,
    /// Committed-cache entries, expired ones included.
    pub cached_blocks: usize,
    /// Overlay slots holding an uncommitted instance.
    pub live_blocks: usize,
    /// Overlay slots committed while still referenced.
    pub saved_blocks: usize,
    pub free_slots: usize,
}

/// Handle to a block store and its cache.
///
/// Cloning is cheap and yields a handle to the same manager. References
/// created by a manager keep only a weak handle to it, so dropping the last
/// `BlockManager` closes the store even while references are still around;
/// using them afterwards fails with [`BlockError::ManagerDropped`].
///
/// Single-threaded: the manager is neither `Send` nor `Sync`.
#[derive(Clone)]
pub struct BlockManager {
    inner: Rc<ManagerInner>,
}

impl BlockManager {
    /// Manage `store` with the default configuration.
    pub fn new<S: BackingStore + 'static>(store: S) -> Self {
        Self::with_config(store, ManagerConfig::default())
    }

    pub fn with_config<S: BackingStore + 'static>(store: S, config: ManagerConfig) -> Self {
        Self {
            inner: Rc::new(ManagerInner {
                store: RefCell::new(Box::new(store)),
                cache: RefCell::new(BlockCache::new()),
                config,
            }),
        }
    }

    /// Open a file-backed manager.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> BlockResult<Self> {
        Ok(Self::new(FileStore::open(path, config)?))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Whether both handles refer to the same manager.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ManagerInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<ManagerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn owns(&self, weak: &Weak<ManagerInner>) -> bool {
        std::ptr::eq(weak.as_ptr(), Rc::as_ptr(&self.inner))
    }

    pub(crate) fn store_mut(&self) -> BlockResult<RefMut<'_, Box<dyn BackingStore>>> {
        self.inner
            .store
            .try_borrow_mut()
            .map_err(|_| BlockError::BlockInUse)
    }

    fn cache(&self) -> BlockResult<Ref<'_, BlockCache>> {
        self.inner
            .cache
            .try_borrow()
            .map_err(|_| BlockError::BlockInUse)
    }

    fn cache_mut(&self) -> BlockResult<RefMut<'_, BlockCache>> {
        self.inner
            .cache
            .try_borrow_mut()
            .map_err(|_| BlockError::BlockInUse)
    }

    // ---- header ----

    /// Truncate the store to an empty header and drop all cached state.
    ///
    /// References created before formatting become stale: committed ones
    /// point past the end of the file, uncommitted ones at freed slots.
    pub fn format(&self) -> BlockResult<()> {
        self.store_mut()?.resize(HEADER_SIZE)?;
        self.write_meta(&MetaInfo::empty())?;
        self.sync()?;
        let released = self.cache_mut()?.reset();
        debug!(released = released.len(), "formatted block store");
        drop(released);
        Ok(())
    }

    /// Read and validate the header.
    pub fn meta(&self) -> BlockResult<MetaInfo> {
        let mut store = self.store_mut()?;
        let size = store.size();
        if size < HEADER_SIZE {
            return Err(BlockError::MalformedHeader(format!(
                "store of {size} bytes is shorter than the header"
            )));
        }
        let data = store.window(0, HEADER_SIZE)?;
        MetaInfo::from_bytes(data, size)
    }

    /// Whether the store holds a valid header.
    pub fn is_formatted(&self) -> bool {
        self.meta().is_ok()
    }

    fn write_meta(&self, meta: &MetaInfo) -> BlockResult<()> {
        let bytes = meta.to_bytes()?;
        self.store_mut()?
            .window_mut(0, HEADER_SIZE)?
            .copy_from_slice(&bytes);
        Ok(())
    }

    /// Reference to the committed root.
    pub fn root<T>(&self) -> BlockResult<BlockRef<T>> {
        let meta = self.meta()?;
        Ok(BlockRef::from_parts(Some(self.downgrade()), meta.root))
    }

    /// A null reference bound to this manager.
    pub fn new_ref<T>(&self) -> BlockRef<T> {
        BlockRef::new(self)
    }

    // ---- addresses ----

    /// Map a slot committed by an earlier pass to its file offset.
    pub(crate) fn resolve(&self, address: BlockAddress) -> BlockResult<BlockAddress> {
        match address {
            BlockAddress::Uncommitted(slot) => {
                Ok(match self.cache()?.overlay.committed_offset(slot)? {
                    Some(offset) => BlockAddress::Committed(offset),
                    None => address,
                })
            }
            _ => Ok(address),
        }
    }

    pub(crate) fn check_owner<T>(&self, reference: &BlockRef<T>) -> BlockResult<()> {
        match reference.manager_weak() {
            None => Err(BlockError::Unbound),
            Some(weak) if self.owns(weak) => Ok(()),
            Some(_) => Err(BlockError::ForeignReference),
        }
    }

    // ---- read / write ----

    /// Shared access to the block behind `reference`.
    ///
    /// A committed block is decoded once and shared by every `BlockPtr` that
    /// reads it while any of them is alive.
    pub fn read<T: Layout + 'static>(&self, reference: &BlockRef<T>) -> BlockResult<BlockPtr<T>> {
        self.check_owner(reference)?;
        match self.resolve(reference.raw_address())? {
            BlockAddress::Invalid => Err(BlockError::NullReference),
            BlockAddress::Committed(offset) => {
                let cached = self.cache_mut()?.committed.lookup::<T>(offset)?;
                let instance = match cached {
                    Some(instance) => instance,
                    None => {
                        let instance = Rc::new(RefCell::new(self.load_block::<T>(offset)?));
                        self.cache_mut()?.committed.remember(offset, &instance);
                        instance
                    }
                };
                Ok(BlockPtr::new(instance, Some(offset), self.downgrade()))
            }
            BlockAddress::Uncommitted(slot) => {
                let instance = self.overlay_instance::<T>(slot)?;
                Ok(BlockPtr::new(instance, None, self.downgrade()))
            }
        }
    }

    /// Mutable access to the block behind `reference`, copying it first.
    ///
    /// A committed block is decoded into a private instance in a new overlay
    /// slot and `reference` is retargeted to that slot; the committed block
    /// and any cached instance of it are untouched. A null reference gets a
    /// `T::default()`. Writing an uncommitted block again returns the same
    /// instance.
    pub fn write<T: Layout + Default + 'static>(
        &self,
        reference: &mut BlockRef<T>,
    ) -> BlockResult<BlockPtrMut<T>> {
        self.adopt(reference)?;
        let value = match self.resolve(reference.raw_address())? {
            BlockAddress::Uncommitted(slot) => {
                return self.overlay_instance::<T>(slot).map(BlockPtrMut::new);
            }
            BlockAddress::Committed(offset) => self.load_block::<T>(offset)?,
            BlockAddress::Invalid => T::default(),
        };
        let instance = Rc::new(RefCell::new(value));
        let slot = self.cache_mut()?.overlay.allocate(instance.clone());
        trace!(%slot, "allocated overlay slot");
        reference.set_owned_address(BlockAddress::Uncommitted(slot));
        Ok(BlockPtrMut::new(instance))
    }

    /// Bind an unbound null reference to this manager, or check ownership.
    fn adopt<T>(&self, reference: &mut BlockRef<T>) -> BlockResult<()> {
        if reference.manager_weak().is_none() {
            if !reference.raw_address().is_invalid() {
                return Err(BlockError::Unbound);
            }
            reference.bind(self.downgrade());
        }
        self.check_owner(reference)
    }

    fn overlay_instance<T: 'static>(&self, slot: SlotId) -> BlockResult<Rc<RefCell<T>>> {
        self.cache()?
            .overlay
            .get::<T>(slot)?
            .ok_or(BlockError::StaleSlot {
                index: slot.index,
                generation: slot.generation,
            })
    }

    fn load_block<T: Layout>(&self, offset: u64) -> BlockResult<T> {
        let mut store = self.store_mut()?;
        let size = store.size();
        if offset < HEADER_SIZE || offset % WORD != 0 || offset.saturating_add(WORD) > size {
            return Err(BlockError::InvalidAddress(offset));
        }
        let mut prefix = [0u8; WORD_SIZE];
        prefix.copy_from_slice(store.window(offset, WORD)?);
        let length = u64::from_le_bytes(prefix);
        let start = offset + WORD;
        if length > size - start {
            return Err(BlockError::SizeMismatch {
                offset,
                reason: format!("length {length} runs past the end of a {size}-byte store"),
            });
        }
        let data = store.window(start, length)?;
        let mut ctx = LoadContext::new(data, offset, Some(self.downgrade()));
        let value = T::load(&mut ctx)?;
        ctx.finish()?;
        trace!(offset, length, "loaded block");
        Ok(value)
    }

    // ---- commit ----

    /// Write every uncommitted block reachable from `root` and make it the
    /// stored root.
    ///
    /// Each block is written once even when shared or part of a cycle. On
    /// success `root` and every reference to a committed block resolve to
    /// file offsets. On failure the overlay and header are left as they were;
    /// space already appended to the file is not reclaimed.
    pub fn commit<T: Layout + 'static>(&self, root: &mut BlockRef<T>) -> BlockResult<BlockAddress> {
        self.adopt(root)?;
        let previous = self.meta()?;

        let mut pass = CommitPass::default();
        let result = self
            .commit_address::<T>(root.raw_address(), &mut pass)
            .and_then(|word| self.publish(word, &previous));

        match result {
            Ok(address) => {
                debug!(
                    root = %address,
                    blocks = pass.journal.len(),
                    bytes = pass.bytes,
                    "committed block graph"
                );
                root.set_owned_address(address);
                drop(pass);
                Ok(address)
            }
            Err(err) => {
                let blocks = pass.journal.len();
                let leftovers = self.rollback(pass);
                warn!(error = %err, blocks, "commit failed, overlay restored");
                drop(leftovers);
                Err(err)
            }
        }
    }

    /// Point the header at the committed root.
    ///
    /// Block payloads are synced before the header is written, and the header
    /// is synced again afterwards. If that last sync fails, `previous` is
    /// written back so the header matches the restored overlay.
    fn publish(&self, root_word: u64, previous: &MetaInfo) -> BlockResult<BlockAddress> {
        let root = BlockAddress::from_word(root_word)?;
        self.sync()?;
        let file_size = self.store_mut()?.size();
        self.write_meta(&MetaInfo { file_size, root })?;
        if let Err(err) = self.sync() {
            if let Err(restore) = self.write_meta(previous) {
                warn!(error = %restore, "failed to restore previous header");
            }
            return Err(err);
        }
        Ok(root)
    }

    fn rollback(&self, pass: CommitPass) -> Vec<RetiredBlock> {
        let Ok(mut cache) = self.cache_mut() else {
            return pass.journal.into_iter().map(|(_, block)| block).collect();
        };
        pass.journal
            .into_iter()
            .rev()
            .filter_map(|(slot, block)| cache.overlay.restore(slot, block).err())
            .collect()
    }

    /// On-disk word for `address`, committing the block first if needed.
    pub(crate) fn commit_address<T: Layout + 'static>(
        &self,
        address: BlockAddress,
        pass: &mut CommitPass,
    ) -> BlockResult<u64> {
        match address {
            BlockAddress::Invalid => Ok(INVALID_WORD),
            BlockAddress::Committed(offset) => Ok(offset),
            BlockAddress::Uncommitted(slot) => self.commit_slot::<T>(slot, pass),
        }
    }

    fn commit_slot<T: Layout + 'static>(&self, slot: SlotId, pass: &mut CommitPass) -> BlockResult<u64> {
        if let Some(offset) = self.cache()?.overlay.committed_offset(slot)? {
            return Ok(offset);
        }
        let instance = self.overlay_instance::<T>(slot)?;
        let value = instance.try_borrow().map_err(|_| BlockError::BlockInUse)?;
        let size = layout::encoded_size(&*value);

        // The slot resolves to its offset before its fields are encoded, so
        // references back to it from descendants terminate.
        let offset = self.allocate(size as u64)?;
        let retired = self.cache_mut()?.overlay.mark_committed(slot, offset)?;
        if let Some(block) = retired {
            pass.journal.push((slot, block));
        }
        pass.bytes += size as u64;

        let mut ctx = SaveContext::for_block(self, pass, offset, size);
        value.save(&mut ctx)?;
        ctx.finish()?;
        trace!(%slot, offset, size, "committed block");
        Ok(offset)
    }

    /// Append an empty block of `size` payload bytes.
    fn allocate(&self, size: u64) -> BlockResult<u64> {
        let mut store = self.store_mut()?;
        let offset = align_up_u64(store.size(), WORD);
        store.resize(offset + WORD + size)?;
        store
            .window_mut(offset, WORD)?
            .copy_from_slice(&size.to_le_bytes());
        Ok(offset)
    }

    fn sync(&self) -> BlockResult<()> {
        match self.inner.config.sync_mode {
            SyncMode::EveryCommit => self.flush(),
            SyncMode::OsDefault => Ok(()),
        }
    }

    /// Force written data to stable storage.
    pub fn flush(&self) -> BlockResult<()> {
        self.store_mut()?.flush()?;
        Ok(())
    }

    // ---- inspection ----

    /// Every block between the header and the recorded file size, in file
    /// order. Blocks left behind by failed or superseded commits included.
    pub fn scan_blocks(&self) -> BlockResult<Vec<BlockInfo>> {
        let end = self.meta()?.file_size;
        let mut store = self.store_mut()?;
        let mut blocks = Vec::new();
        let mut offset = HEADER_SIZE;
        while offset < end {
            if end - offset < WORD {
                return Err(BlockError::SizeMismatch {
                    offset,
                    reason: "truncated length prefix".into(),
                });
            }
            let mut prefix = [0u8; WORD_SIZE];
            prefix.copy_from_slice(store.window(offset, WORD)?);
            let length = u64::from_le_bytes(prefix);
            let payload_end = (offset + WORD)
                .checked_add(length)
                .filter(|&payload_end| payload_end <= end)
                .ok_or_else(|| BlockError::SizeMismatch {
                    offset,
                    reason: format!("length {length} runs past recorded file size {end}"),
                })?;
            blocks.push(BlockInfo { offset, length });
            offset = align_up_u64(payload_end, WORD);
        }
        Ok(blocks)
    }

    pub fn stats(&self) -> BlockResult<ManagerStats> {
        let file_size = self.store_mut()?.size();
        let cache = self.cache()?;
        Ok(ManagerStats {
            file_size,
            cached_blocks: cache.committed.len(),
            live_blocks: cache.overlay.live_count(),
            saved_blocks: cache.overlay.saved_count(),
            free_slots: cache.overlay.free_count(),
        })
    }

    // ---- reference bookkeeping ----

    /// Resolve without failing; used for comparisons and display.
    pub(crate) fn resolve_lenient(&self, address: BlockAddress) -> BlockAddress {
        self.resolve(address).unwrap_or(address)
    }

    pub(crate) fn retain_slot(&self, slot: SlotId) {
        let retained = match self.inner.cache.try_borrow_mut() {
            Ok(mut cache) => cache.overlay.inc_ref(slot),
            Err(_) => Err(BlockError::BlockInUse),
        };
        if let Err(err) = retained {
            warn!(%slot, error = %err, "failed to retain overlay slot");
        }
    }

    pub(crate) fn release_slot(&self, slot: SlotId) {
        let released = match self.inner.cache.try_borrow_mut() {
            Ok(mut cache) => cache.overlay.dec_ref(slot),
            Err(_) => {
                warn!(%slot, "overlay busy, slot reference leaked");
                return;
            }
        };
        // Dropped here, outside the borrow: the instance may hold references.
        match released {
            Ok(Some(block)) => {
                trace!(%slot, type_name = block.type_name(), "freed overlay slot");
                drop(block);
            }
            Ok(None) => {}
            Err(err) => trace!(%slot, error = %err, "release of stale slot"),
        }
    }

    /// Forget the cached instance for `offset` if it is `instance`.
    pub(crate) fn release_cached(&self, offset: u64, instance: *const ()) {
        if let Ok(mut cache) = self.inner.cache.try_borrow_mut() {
            cache.committed.release(offset, instance);
        }
    }
}

impl std::fmt::Debug for BlockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockManager")
            .field("config", &self.inner.config)
            .field("stats", &self.stats().ok())
            .finish()
    }
}
