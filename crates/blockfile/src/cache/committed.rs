use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::{BlockError, BlockResult};

struct CachedBlock {
    type_id: TypeId,
    type_name: &'static str,
    instance: Weak<dyn Any>,
}

/// Weak map from committed offset to its decoded instance.
///
/// Holds no instance alive: an entry is only useful while some `BlockPtr`
/// still holds the instance, which keeps at most one decoded copy of a
/// committed block in memory.
#[derive(Default)]
pub struct CommittedCache {
    blocks: HashMap<u64, CachedBlock>,
}

impl CommittedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live instance decoded from `offset`, if any. Expired entries are
    /// pruned on the way.
    pub fn lookup<T: 'static>(&mut self, offset: u64) -> BlockResult<Option<Rc<RefCell<T>>>> {
        let Some(entry) = self.blocks.get(&offset) else {
            return Ok(None);
        };
        let Some(instance) = entry.instance.upgrade() else {
            self.blocks.remove(&offset);
            return Ok(None);
        };
        if entry.type_id != TypeId::of::<RefCell<T>>() {
            return Err(BlockError::TypeMismatch {
                expected: type_name::<T>(),
                found: entry.type_name,
            });
        }
        instance
            .downcast::<RefCell<T>>()
            .map(Some)
            .map_err(|_| BlockError::TypeMismatch {
                expected: type_name::<T>(),
                found: entry.type_name,
            })
    }

    /// Record `instance` as the decoded form of `offset`.
    pub fn remember<T: 'static>(&mut self, offset: u64, instance: &Rc<RefCell<T>>) {
        let erased: Rc<dyn Any> = instance.clone();
        self.blocks.insert(
            offset,
            CachedBlock {
                type_id: TypeId::of::<RefCell<T>>(),
                type_name: type_name::<T>(),
                instance: Rc::downgrade(&erased),
            },
        );
    }

    /// Drop the entry for `offset` if its instance is gone.
    pub fn evict_if_expired(&mut self, offset: u64) -> bool {
        let expired = self
            .blocks
            .get(&offset)
            .is_some_and(|entry| entry.instance.strong_count() == 0);
        if expired {
            self.blocks.remove(&offset);
        }
        expired
    }

    /// Drop the entry for `offset` if it refers to `instance`, which its last
    /// holder is about to release.
    pub fn release(&mut self, offset: u64, instance: *const ()) -> bool {
        let matches = self
            .blocks
            .get(&offset)
            .is_some_and(|entry| entry.instance.as_ptr() as *const () == instance);
        if matches {
            self.blocks.remove(&offset);
        }
        matches
    }

    /// Whether a live instance is cached for `offset`.
    pub fn contains(&self, offset: u64) -> bool {
        self.blocks
            .get(&offset)
            .is_some_and(|entry| entry.instance.strong_count() > 0)
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

impl std::fmt::Debug for CommittedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommittedCache")
            .field("entries", &self.blocks.len())
            .finish()
    }
}
