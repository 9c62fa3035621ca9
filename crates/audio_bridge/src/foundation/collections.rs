//! Specialized collection types
//!
//! [`HandleTable`] is a sparse array of optional slots. Freed slots are
//! recycled lowest index first, so handle numbers stay small and
//! deterministic, and each slot carries a generation counter so a handle
//! kept past its resource's lifetime is rejected instead of silently
//! addressing whatever was stored in the slot afterwards.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed handle into a [`HandleTable`]
///
/// The marker type `K` keeps handles of different resource kinds apart at
/// compile time; it is never stored.
pub struct Handle<K> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Handle<K> {
    const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index; the small integer that shows up in logs
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot at the time the handle was issued
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Handle<K> {}

impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<K> Eq for Handle<K> {}

impl<K> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<K> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

/// Lookup or removal through a handle that does not name a live slot
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no live resource at slot {index} (generation {generation})")]
pub struct StaleHandle {
    /// Slot index the handle pointed at
    pub index: u32,
    /// Generation the handle carried
    pub generation: u32,
}

impl<K> From<Handle<K>> for StaleHandle {
    fn from(handle: Handle<K>) -> Self {
        Self {
            index: handle.index,
            generation: handle.generation,
        }
    }
}

struct Slot<V> {
    generation: u32,
    value: Option<V>,
}

/// Sparse array with lowest-index slot reuse
///
/// The table never shrinks: freeing a resource only empties its slot.
pub struct HandleTable<K, V> {
    slots: Vec<Slot<V>>,
    len: usize,
    _marker: PhantomData<fn() -> K>,
}

#[allow(clippy::cast_possible_truncation)]
const fn slot_index(index: usize) -> u32 {
    index as u32
}

impl<K, V> HandleTable<K, V> {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }

    /// Store a value in the first empty slot, appending one if none is free
    pub fn insert(&mut self, value: V) -> Handle<K> {
        self.len += 1;

        if let Some(index) = self.slots.iter().position(|slot| slot.value.is_none()) {
            let slot = &mut self.slots[index];
            slot.value = Some(value);
            return Handle::new(slot_index(index), slot.generation);
        }

        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle::new(slot_index(index), 0)
    }

    fn slot(&self, handle: Handle<K>) -> Option<&Slot<V>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }

    /// Borrow the value behind a handle
    pub fn get(&self, handle: Handle<K>) -> Result<&V, StaleHandle> {
        self.slot(handle)
            .and_then(|slot| slot.value.as_ref())
            .ok_or_else(|| handle.into())
    }

    /// Mutably borrow the value behind a handle
    pub fn get_mut(&mut self, handle: Handle<K>) -> Result<&mut V, StaleHandle> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
            .ok_or_else(|| handle.into())
    }

    /// Take the value out and mark the slot empty
    ///
    /// The slot's generation advances, so every copy of `handle` goes stale.
    pub fn remove(&mut self, handle: Handle<K>) -> Result<V, StaleHandle> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.value.is_some())
            .ok_or(StaleHandle::from(handle))?;

        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        slot.value.take().ok_or_else(|| handle.into())
    }

    /// Whether the handle names a live value
    pub fn contains(&self, handle: Handle<K>) -> bool {
        self.get(handle).is_ok()
    }

    /// Number of live values
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no value is live
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated, live or empty
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterate live values in index order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<K>, &V)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(slot_index(index), slot.generation), value))
        })
    }

    /// Handles of all live values in index order
    pub fn handles(&self) -> Vec<Handle<K>> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Empty every slot, returning the values in index order
    pub fn drain(&mut self) -> Vec<V> {
        self.len = 0;
        self.slots
            .iter_mut()
            .filter_map(|slot| {
                let value = slot.value.take()?;
                slot.generation = slot.generation.wrapping_add(1);
                Some(value)
            })
            .collect()
    }
}

impl<K, V> Default for HandleTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V: fmt::Debug> fmt::Debug for HandleTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|(handle, value)| (handle.index, value)))
            .finish()
    }
}
