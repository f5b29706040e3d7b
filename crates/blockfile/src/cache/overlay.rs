use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::rc::Rc;

use crate::address::SlotId;
use crate::error::{BlockError, BlockResult};

/// A block instance taken out of the overlay, with the type tag it was
/// stored under.
pub struct RetiredBlock {
    type_id: TypeId,
    type_name: &'static str,
    instance: Rc<dyn Any>,
}

impl RetiredBlock {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn into_instance(self) -> Rc<dyn Any> {
        self.instance
    }
}

enum SlotState {
    Free {
        next: Option<usize>,
    },
    Live {
        ref_count: usize,
        block: RetiredBlock,
    },
    /// Committed by a previous pass while references to the slot were still
    /// held. Resolves to `offset` from now on.
    Saved {
        ref_count: usize,
        offset: u64,
    },
}

struct Slot {
    generation: u64,
    state: SlotState,
}

/// Slab of uncommitted block instances, addressed by [`SlotId`].
///
/// Slots are reference counted by the `BlockRef`s pointing at them and freed
/// when the count reaches zero. Freed slots go on a free list; every
/// allocation takes a fresh generation from a counter that is never reset,
/// so an outstanding handle to a freed or reset slot is always detected.
///
/// Methods that release an instance hand it back instead of dropping it:
/// dropping a block can release the references it holds, which re-enters
/// the cache.
#[derive(Default)]
pub struct NewBlockCache {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    next_generation: u64,
}

impl NewBlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `instance` in a slot with a reference count of one.
    pub fn allocate<T: 'static>(&mut self, instance: Rc<RefCell<T>>) -> SlotId {
        let generation = self.next_generation;
        self.next_generation += 1;
        let state = SlotState::Live {
            ref_count: 1,
            block: RetiredBlock {
                type_id: TypeId::of::<RefCell<T>>(),
                type_name: type_name::<T>(),
                instance,
            },
        };
        let slot = Slot { generation, state };

        match self.free_head {
            Some(index) => {
                let previous = std::mem::replace(&mut self.slots[index], slot);
                self.free_head = match previous.state {
                    SlotState::Free { next } => next,
                    _ => None,
                };
                SlotId { index, generation }
            }
            None => {
                self.slots.push(slot);
                SlotId {
                    index: self.slots.len() - 1,
                    generation,
                }
            }
        }
    }

    fn stale(id: SlotId) -> BlockError {
        BlockError::StaleSlot {
            index: id.index,
            generation: id.generation,
        }
    }

    fn slot(&self, id: SlotId) -> BlockResult<&Slot> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .filter(|slot| !matches!(slot.state, SlotState::Free { .. }))
            .ok_or_else(|| Self::stale(id))
    }

    fn slot_mut(&mut self, id: SlotId) -> BlockResult<&mut Slot> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .filter(|slot| !matches!(slot.state, SlotState::Free { .. }))
            .ok_or_else(|| Self::stale(id))
    }

    /// The live instance in `id`, or `None` if the slot has been committed.
    pub fn get<T: 'static>(&self, id: SlotId) -> BlockResult<Option<Rc<RefCell<T>>>> {
        let block = match &self.slot(id)?.state {
            SlotState::Live { block, .. } => block,
            _ => return Ok(None),
        };
        if block.type_id != TypeId::of::<RefCell<T>>() {
            return Err(BlockError::TypeMismatch {
                expected: type_name::<T>(),
                found: block.type_name,
            });
        }
        block
            .instance
            .clone()
            .downcast::<RefCell<T>>()
            .map(Some)
            .map_err(|_| BlockError::TypeMismatch {
                expected: type_name::<T>(),
                found: block.type_name,
            })
    }

    pub fn inc_ref(&mut self, id: SlotId) -> BlockResult<()> {
        match &mut self.slot_mut(id)?.state {
            SlotState::Live { ref_count, .. } | SlotState::Saved { ref_count, .. } => {
                *ref_count += 1;
            }
            SlotState::Free { .. } => return Err(Self::stale(id)),
        }
        Ok(())
    }

    /// Drop one reference. At zero the slot is freed and a live instance is
    /// returned for the caller to drop.
    pub fn dec_ref(&mut self, id: SlotId) -> BlockResult<Option<RetiredBlock>> {
        let next = self.free_head;
        let slot = self.slot_mut(id)?;
        let remaining = match &mut slot.state {
            SlotState::Live { ref_count, .. } | SlotState::Saved { ref_count, .. } => {
                *ref_count -= 1;
                *ref_count
            }
            SlotState::Free { .. } => return Err(Self::stale(id)),
        };
        if remaining > 0 {
            return Ok(None);
        }
        let freed = std::mem::replace(&mut slot.state, SlotState::Free { next });
        self.free_head = Some(id.index);
        Ok(match freed {
            SlotState::Live { block, .. } => Some(block),
            _ => None,
        })
    }

    pub fn is_committed(&self, id: SlotId) -> BlockResult<bool> {
        Ok(self.committed_offset(id)?.is_some())
    }

    /// Offset the slot was committed to, if it has been.
    pub fn committed_offset(&self, id: SlotId) -> BlockResult<Option<u64>> {
        Ok(match self.slot(id)?.state {
            SlotState::Saved { offset, .. } => Some(offset),
            _ => None,
        })
    }

    /// Replace the live instance with its committed `offset` and hand the
    /// instance back. `None` if the slot was already committed.
    pub fn mark_committed(&mut self, id: SlotId, offset: u64) -> BlockResult<Option<RetiredBlock>> {
        let slot = self.slot_mut(id)?;
        let ref_count = match slot.state {
            SlotState::Live { ref_count, .. } => ref_count,
            _ => return Ok(None),
        };
        let previous = std::mem::replace(&mut slot.state, SlotState::Saved { ref_count, offset });
        Ok(match previous {
            SlotState::Live { block, .. } => Some(block),
            _ => None,
        })
    }

    /// Undo [`NewBlockCache::mark_committed`]. Hands `block` back if the slot
    /// is no longer in the committed state.
    pub fn restore(&mut self, id: SlotId, block: RetiredBlock) -> Result<(), RetiredBlock> {
        let Ok(slot) = self.slot_mut(id) else {
            return Err(block);
        };
        match slot.state {
            SlotState::Saved { ref_count, .. } => {
                slot.state = SlotState::Live { ref_count, block };
                Ok(())
            }
            _ => Err(block),
        }
    }

    /// Empty the slab. Outstanding handles become stale; their later
    /// releases fail harmlessly.
    pub fn reset(&mut self) -> Vec<RetiredBlock> {
        self.free_head = None;
        self.slots
            .drain(..)
            .filter_map(|slot| match slot.state {
                SlotState::Live { block, .. } => Some(block),
                _ => None,
            })
            .collect()
    }

    pub fn live_count(&self) -> usize {
        self.count(|state| matches!(state, SlotState::Live { .. }))
    }

    pub fn saved_count(&self) -> usize {
        self.count(|state| matches!(state, SlotState::Saved { .. }))
    }

    pub fn free_count(&self) -> usize {
        self.count(|state| matches!(state, SlotState::Free { .. }))
    }

    /// Total slots, free ones included.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn count(&self, pred: impl Fn(&SlotState) -> bool) -> usize {
        self.slots.iter().filter(|slot| pred(&slot.state)).count()
    }
}

impl std::fmt::Debug for NewBlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewBlockCache")
            .field("live", &self.live_count())
            .field("saved", &self.saved_count())
            .field("free", &self.free_count())
            .finish()
    }
}
