//! Typed references to blocks and the guards that give access to them.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::address::{BlockAddress, WORD_SIZE};
use crate::error::{BlockError, BlockResult};
use crate::layout::{Layout, LayoutKind, LoadContext, MeasureContext, SaveContext};
use crate::manager::{BlockManager, ManagerInner};

/// Typed reference to a block of `T`.
///
/// A reference is either null, a file offset, or an overlay slot. References
/// to slots are counted: the slot lives until the last reference to it is
/// dropped. A reference holds its manager weakly and is encoded inside other
/// blocks as a single word.
pub struct BlockRef<T> {
    manager: Option<Weak<ManagerInner>>,
    address: BlockAddress,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BlockRef<T> {
    /// A null reference bound to `manager`.
    pub fn new(manager: &BlockManager) -> Self {
        Self::from_parts(Some(manager.downgrade()), BlockAddress::Invalid)
    }

    /// A null reference with no manager. `BlockManager::write` binds it.
    pub fn unbound() -> Self {
        Self::from_parts(None, BlockAddress::Invalid)
    }

    /// Takes over one count of the slot when `address` is uncommitted.
    pub(crate) fn from_parts(manager: Option<Weak<ManagerInner>>, address: BlockAddress) -> Self {
        Self {
            manager,
            address,
            _marker: PhantomData,
        }
    }

    /// The stored address, without resolving committed slots.
    pub fn raw_address(&self) -> BlockAddress {
        self.address
    }

    /// The current address. A slot that has since been committed resolves
    /// to its file offset.
    pub fn address(&self) -> BlockAddress {
        match (self.address, self.upgrade()) {
            (BlockAddress::Uncommitted(_), Some(manager)) => manager.resolve_lenient(self.address),
            _ => self.address,
        }
    }

    pub fn is_null(&self) -> bool {
        self.address.is_invalid()
    }

    pub fn is_committed(&self) -> bool {
        self.address().is_committed()
    }

    pub fn is_bound(&self) -> bool {
        self.manager.is_some()
    }

    /// The manager this reference belongs to.
    pub fn manager(&self) -> BlockResult<BlockManager> {
        let weak = self.manager.as_ref().ok_or(BlockError::Unbound)?;
        BlockManager::upgrade(weak).ok_or(BlockError::ManagerDropped)
    }

    /// Replace a resolved slot address with its file offset, releasing the
    /// slot.
    pub fn normalize(&mut self) {
        let resolved = self.address();
        if resolved != self.address {
            self.set_owned_address(resolved);
        }
    }

    /// Make this reference null, releasing its slot if it has one.
    pub fn clear(&mut self) {
        self.set_owned_address(BlockAddress::Invalid);
    }

    pub(crate) fn manager_weak(&self) -> Option<&Weak<ManagerInner>> {
        self.manager.as_ref()
    }

    pub(crate) fn bind(&mut self, manager: Weak<ManagerInner>) {
        self.manager = Some(manager);
    }

    /// Point at `address`, whose slot count (if any) the caller hands over.
    pub(crate) fn set_owned_address(&mut self, address: BlockAddress) {
        let previous = std::mem::replace(&mut self.address, address);
        self.release(previous);
    }

    fn upgrade(&self) -> Option<BlockManager> {
        self.manager.as_ref().and_then(BlockManager::upgrade)
    }

    fn release(&self, address: BlockAddress) {
        if let BlockAddress::Uncommitted(slot) = address {
            if let Some(manager) = self.upgrade() {
                manager.release_slot(slot);
            }
        }
    }
}

impl<T: Layout + 'static> BlockRef<T> {
    /// See [`BlockManager::read`].
    pub fn read(&self) -> BlockResult<BlockPtr<T>> {
        self.manager()?.read(self)
    }

    /// See [`BlockManager::commit`].
    pub fn commit(&mut self) -> BlockResult<BlockAddress> {
        self.manager()?.commit(self)
    }
}

impl<T: Layout + Default + 'static> BlockRef<T> {
    /// See [`BlockManager::write`].
    pub fn write(&mut self) -> BlockResult<BlockPtrMut<T>> {
        self.manager()?.write(self)
    }
}

impl<T> Default for BlockRef<T> {
    fn default() -> Self {
        Self::unbound()
    }
}

impl<T> Clone for BlockRef<T> {
    fn clone(&self) -> Self {
        if let BlockAddress::Uncommitted(slot) = self.address {
            if let Some(manager) = self.upgrade() {
                manager.retain_slot(slot);
            }
        }
        Self::from_parts(self.manager.clone(), self.address)
    }
}

impl<T> Drop for BlockRef<T> {
    fn drop(&mut self) {
        self.release(self.address);
    }
}

impl<T> PartialEq for BlockRef<T> {
    fn eq(&self, other: &Self) -> bool {
        let same_manager = match (&self.manager, &other.manager) {
            (Some(a), Some(b)) => Weak::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        same_manager && self.address() == other.address()
    }
}

impl<T> Eq for BlockRef<T> {}

impl<T> fmt::Debug for BlockRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockRef({})", self.address)
    }
}

impl<T: Layout + 'static> Layout for BlockRef<T> {
    const KIND: LayoutKind = LayoutKind::Fixed { size: WORD_SIZE };
    const ALIGN: usize = WORD_SIZE;

    fn measure(&self, ctx: &mut MeasureContext) {
        ctx.reserve(WORD_SIZE, WORD_SIZE);
    }

    fn save(&self, ctx: &mut SaveContext<'_>) -> BlockResult<()> {
        let word = ctx.commit_reference(self)?;
        ctx.write_word(word)
    }

    fn load(ctx: &mut LoadContext<'_>) -> BlockResult<Self> {
        let address = BlockAddress::from_word(ctx.read_word()?)?;
        Ok(Self::from_parts(ctx.manager(), address))
    }
}

/// Shared access to a block instance, returned by [`BlockManager::read`].
pub struct BlockPtr<T> {
    instance: Rc<RefCell<T>>,
    offset: Option<u64>,
    manager: Weak<ManagerInner>,
}

impl<T> BlockPtr<T> {
    pub(crate) fn new(
        instance: Rc<RefCell<T>>,
        offset: Option<u64>,
        manager: Weak<ManagerInner>,
    ) -> Self {
        Self {
            instance,
            offset,
            manager,
        }
    }

    /// Borrow the instance. Panics while a `BlockPtrMut` of the same
    /// uncommitted block is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.instance.borrow()
    }

    /// Whether both guards share one instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.instance, &other.instance)
    }

    /// File offset the instance was decoded from; `None` for an uncommitted
    /// block.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }
}

impl<T> Clone for BlockPtr<T> {
    fn clone(&self) -> Self {
        Self::new(self.instance.clone(), self.offset, self.manager.clone())
    }
}

impl<T> Drop for BlockPtr<T> {
    fn drop(&mut self) {
        let Some(offset) = self.offset else {
            return;
        };
        if Rc::strong_count(&self.instance) != 1 {
            return;
        }
        if let Some(manager) = BlockManager::upgrade(&self.manager) {
            manager.release_cached(offset, Rc::as_ptr(&self.instance) as *const ());
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for BlockPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPtr")
            .field("offset", &self.offset)
            .field("value", &self.instance.try_borrow().ok())
            .finish()
    }
}

/// Mutable access to an uncommitted block instance, returned by
/// [`BlockManager::write`].
///
/// After a commit the guard's instance is detached: further changes through
/// it are not persisted. Call `write` again for a fresh copy.
pub struct BlockPtrMut<T> {
    instance: Rc<RefCell<T>>,
}

impl<T> BlockPtrMut<T> {
    pub(crate) fn new(instance: Rc<RefCell<T>>) -> Self {
        Self { instance }
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.instance.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.instance.borrow_mut()
    }

    /// Like [`BlockPtrMut::borrow_mut`], failing instead of panicking when
    /// the instance is already borrowed.
    pub fn try_borrow_mut(&self) -> BlockResult<RefMut<'_, T>> {
        self.instance
            .try_borrow_mut()
            .map_err(|_| BlockError::BlockInUse)
    }

    /// Replace the instance's value.
    pub fn set(&self, value: T) {
        *self.instance.borrow_mut() = value;
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.instance, &other.instance)
    }
}

impl<T> Clone for BlockPtrMut<T> {
    fn clone(&self) -> Self {
        Self::new(self.instance.clone())
    }
}

impl<T: fmt::Debug> fmt::Debug for BlockPtrMut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPtrMut")
            .field("value", &self.instance.try_borrow().ok())
            .finish()
    }
}
