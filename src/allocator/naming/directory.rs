//! In-memory object directory.

use super::{NameDirectory, NameError, NamedObject};
use crate::allocator::handle::{Address, ArenaId};
use std::collections::HashMap;

/// An in-memory, fixed-capacity [`NameDirectory`].
///
/// Slots are reused lowest-first once freed.
#[derive(Debug, Clone)]
pub struct ObjectDirectory {
    slots: Vec<Option<NamedObject>>,
    by_name: HashMap<(ArenaId, String), usize>,
    by_offset: HashMap<(ArenaId, usize), usize>,
}

impl ObjectDirectory {
    /// Default number of slots.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Creates a directory holding at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            by_name: HashMap::new(),
            by_offset: HashMap::new(),
        }
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// All records, in slot order.
    pub fn records(&self) -> impl Iterator<Item = &NamedObject> {
        self.slots.iter().flatten()
    }

    fn record_mut(&mut self, arena: ArenaId, slot: usize) -> Option<&mut NamedObject> {
        self.slots
            .get_mut(slot)?
            .as_mut()
            .filter(|record| record.arena == arena)
    }
}

impl Default for ObjectDirectory {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl NameDirectory for ObjectDirectory {
    fn exists(&self, arena: ArenaId, name: &str) -> bool {
        self.by_name.contains_key(&(arena, name.to_owned()))
    }

    fn get_free_slot(&mut self, _arena: ArenaId) -> Result<usize, NameError> {
        self.slots
            .iter()
            .position(Option::is_none)
            .ok_or(NameError::Full { capacity: self.slots.len() })
    }

    fn register(&mut self, arena: ArenaId, slot: usize, address: Address, name: &str) -> bool {
        if self.exists(arena, name) || self.by_offset.contains_key(&(arena, address.offset())) {
            return false;
        }
        match self.slots.get_mut(slot) {
            Some(entry @ None) => {
                *entry = Some(NamedObject {
                    arena,
                    slot,
                    name: name.to_owned(),
                    offset: address.offset(),
                    size: 0,
                    info: String::new(),
                });
                self.by_name.insert((arena, name.to_owned()), slot);
                self.by_offset.insert((arena, address.offset()), slot);
                true
            }
            _ => false,
        }
    }

    fn set_info(&mut self, arena: ArenaId, slot: usize, info: &str) {
        if let Some(record) = self.record_mut(arena, slot) {
            record.info = info.to_owned();
        }
    }

    fn set_size(&mut self, arena: ArenaId, slot: usize, size: usize) {
        if let Some(record) = self.record_mut(arena, slot) {
            record.size = size;
        }
    }

    fn lookup(&self, arena: ArenaId, name: &str) -> Option<NamedObject> {
        let slot = *self.by_name.get(&(arena, name.to_owned()))?;
        self.slots[slot].clone()
    }

    fn rebind(&mut self, arena: ArenaId, old_offset: usize, address: Address) -> bool {
        let Some(slot) = self.by_offset.remove(&(arena, old_offset)) else {
            return false;
        };
        self.by_offset.insert((arena, address.offset()), slot);
        if let Some(record) = self.record_mut(arena, slot) {
            record.offset = address.offset();
        }
        true
    }

    fn unregister(&mut self, arena: ArenaId, offset: usize) -> Option<NamedObject> {
        let slot = self.by_offset.remove(&(arena, offset))?;
        let record = self.slots[slot].take()?;
        self.by_name.remove(&(arena, record.name.clone()));
        Some(record)
    }

    fn object_count(&self, arena: ArenaId) -> usize {
        self.records().filter(|record| record.arena == arena).count()
    }

    fn adopt(&mut self, from: ArenaId, to: ArenaId) -> usize {
        if from == to {
            return 0;
        }
        let mut moved = 0;
        for record in self.slots.iter_mut().flatten().filter(|record| record.arena == from) {
            self.by_name.remove(&(from, record.name.clone()));
            self.by_offset.remove(&(from, record.offset));
            record.arena = to;
            self.by_name.insert((to, record.name.clone()), record.slot);
            self.by_offset.insert((to, record.offset), record.slot);
            moved += 1;
        }
        moved
    }
}
