//! Index arena for linked structures.
//!
//! Doubly linked and multi-level structures (quicklist nodes, skip list nodes,
//! hash table chains) keep their nodes in a single backing vector and link
//! them with 32-bit indices instead of pointers. This:
//! - Avoids aliasing between forward and backward links
//! - Halves link size compared to 64-bit pointers
//! - Lets freed slots be reused without returning memory to the allocator

use std::mem;

use crate::error::Result;

/// A 32-bit index into a [`Slab`], used in place of a node pointer.
///
/// Limits a single structure to 2^32 - 1 live nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// The "no node" link.
    pub const NIL: NodeId = NodeId(u32::MAX);

    /// Check if this link points nowhere.
    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == u32::MAX
    }

    /// Convert to `Option`, mapping NIL to `None`.
    #[inline]
    pub fn get(self) -> Option<NodeId> {
        if self.is_nil() {
            None
        } else {
            Some(self)
        }
    }

    /// Create an id from a slot index.
    ///
    /// # Panics
    /// Panics if the index is >= 2^32 - 1.
    #[inline]
    pub fn from_usize(index: usize) -> Self {
        assert!(index < u32::MAX as usize, "arena index too large");
        Self(index as u32)
    }

    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::NIL
    }
}

#[derive(Clone, Debug)]
enum Slot<T> {
    Occupied(T),
    /// Vacant slot, linked into the free list.
    Vacant(NodeId),
}

/// A vector of node slots with a free list.
///
/// Ids stay stable for the lifetime of the node they name; a removed node's
/// slot is reused by a later insert.
#[derive(Clone, Debug)]
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: NodeId,
    len: usize,
}

impl<T> Slab<T> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: NodeId::NIL,
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: NodeId::NIL,
            len: 0,
        }
    }

    /// Store `value`, reusing a free slot if one exists.
    pub fn insert(&mut self, value: T) -> NodeId {
        match self.try_insert(value) {
            Ok(id) => id,
            Err(e) => panic!("{e}"),
        }
    }

    /// Store `value`, reporting allocation failure instead of aborting.
    pub fn try_insert(&mut self, value: T) -> Result<NodeId> {
        let id = if let Some(id) = self.free.get() {
            let slot = &mut self.slots[id.as_usize()];
            let next_free = match slot {
                Slot::Vacant(next) => *next,
                Slot::Occupied(_) => unreachable!("free list points at a live slot"),
            };
            *slot = Slot::Occupied(value);
            self.free = next_free;
            id
        } else {
            self.slots.try_reserve(1)?;
            let id = NodeId::from_usize(self.slots.len());
            self.slots.push(Slot::Occupied(value));
            id
        };
        self.len += 1;
        Ok(id)
    }

    /// Remove and return the node at `id`.
    ///
    /// # Panics
    /// Panics if `id` does not name a live node.
    pub fn remove(&mut self, id: NodeId) -> T {
        let slot = &mut self.slots[id.as_usize()];
        match mem::replace(slot, Slot::Vacant(self.free)) {
            Slot::Occupied(value) => {
                self.free = id;
                self.len -= 1;
                value
            }
            Slot::Vacant(next) => {
                *slot = Slot::Vacant(next);
                panic!("removing vacant arena slot {}", id.as_usize());
            }
        }
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&T> {
        match self.slots.get(id.as_usize()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        match self.slots.get_mut(id.as_usize()) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free = NodeId::NIL;
        self.len = 0;
    }

    /// Iterate over live nodes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Occupied(value) => Some((NodeId::from_usize(i), value)),
            Slot::Vacant(_) => None,
        })
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::ops::Index<NodeId> for Slab<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: NodeId) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("dangling arena id {}", id.as_usize()),
        }
    }
}

impl<T> std::ops::IndexMut<NodeId> for Slab<T> {
    #[inline]
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("dangling arena id {}", id.as_usize()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_basic() {
        let mut slab = Slab::new();
        let a = slab.insert("hello");
        let b = slab.insert("world");

        assert_eq!(slab[a], "hello");
        assert_eq!(slab[b], "world");
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn test_slab_reuses_freed_slots() {
        let mut slab = Slab::new();
        let a = slab.insert(1u64);
        let _b = slab.insert(2u64);

        assert_eq!(slab.remove(a), 1);
        assert!(slab.get(a).is_none());
        assert_eq!(slab.len(), 1);

        let c = slab.insert(3u64);
        assert_eq!(c, a);
        assert_eq!(slab.capacity(), 2);
        assert_eq!(slab[c], 3);
    }

    #[test]
    fn test_nil_id() {
        assert!(NodeId::NIL.is_nil());
        assert_eq!(NodeId::NIL.get(), None);
        assert_eq!(NodeId::default(), NodeId::NIL);
        assert_eq!(NodeId::from_usize(7).get(), Some(NodeId::from_usize(7)));
    }

    #[test]
    #[should_panic]
    fn test_double_remove_panics() {
        let mut slab = Slab::new();
        let a = slab.insert(1u8);
        slab.remove(a);
        slab.remove(a);
    }
}
