//! Doubly-linked lists stored in an index arena.
//!
//! Buffer objects, connectors, planes and the like are enumerated in
//! insertion order and removed from the middle of their list in O(1). Rather
//! than threading raw prev/next pointers through the objects, each list keeps
//! its nodes in a `Vec` of slots linked by index, with a sentinel head at
//! slot 0 and a free list for recycling vacated slots.
//!
//! A [`SlotKey`] carries the generation of the slot it was issued for, so a
//! key kept after its node was removed can never reach a node that later
//! reuses the same slot.

#[cfg(test)]
mod tests;

use crate::result::Result;

const HEAD: usize = 0;

/// Names one node of a [`SlotList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
struct Slot<T> {
    prev: usize,
    next: usize,
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct SlotList<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for SlotList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotList<T> {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                prev: HEAD,
                next: HEAD,
                generation: 0,
                value: None,
            }],
            free: Vec::new(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the head links back to itself.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots[HEAD].next == HEAD
    }

    /// Makes sure the next [`Self::push_back`] cannot fail.
    pub fn reserve(&mut self) -> Result<()> {
        if self.free.is_empty() {
            self.slots.try_reserve(1)?;
        }
        Ok(())
    }

    /// Appends `value` at the tail, reusing a vacated slot when one exists.
    pub fn push_back(&mut self, value: T) -> Result<SlotKey> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.try_reserve(1)?;
                self.slots.push(Slot {
                    prev: HEAD,
                    next: HEAD,
                    generation: 0,
                    value: None,
                });
                self.slots.len() - 1
            }
        };
        let tail = self.slots[HEAD].prev;
        let slot = &mut self.slots[index];
        slot.prev = tail;
        slot.next = HEAD;
        slot.value = Some(value);
        let generation = slot.generation;
        self.slots[tail].next = index;
        self.slots[HEAD].prev = index;
        self.len += 1;
        Ok(SlotKey {
            index: index as u32,
            generation,
        })
    }

    fn resolve(&self, key: SlotKey) -> Option<usize> {
        let index = key.index as usize;
        match self.slots.get(index) {
            Some(slot)
                if index != HEAD && slot.generation == key.generation && slot.value.is_some() =>
            {
                Some(index)
            }
            _ => None,
        }
    }

    pub fn contains(&self, key: SlotKey) -> bool {
        self.resolve(key).is_some()
    }

    pub fn get(&self, key: SlotKey) -> Option<&T> {
        let index = self.resolve(key)?;
        self.slots[index].value.as_ref()
    }

    pub fn get_mut(&mut self, key: SlotKey) -> Option<&mut T> {
        let index = self.resolve(key)?;
        self.slots[index].value.as_mut()
    }

    /// Unlinks the node named by `key` and returns its value.
    pub fn remove(&mut self, key: SlotKey) -> Option<T> {
        let index = self.resolve(key)?;
        let slot = &mut self.slots[index];
        let (prev, next) = (slot.prev, slot.next);
        let value = slot.value.take();
        slot.prev = index;
        slot.next = index;
        slot.generation = slot.generation.wrapping_add(1);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
        self.free.push(index);
        self.len -= 1;
        value
    }

    /// Walks the list from head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cur: self.slots[HEAD].next,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = SlotKey> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn first(&self) -> Option<SlotKey> {
        self.keys().next()
    }

    /// Removes every node, returning the values in list order.
    pub fn drain(&mut self) -> Vec<T> {
        let keys: Vec<SlotKey> = self.keys().collect();
        keys.into_iter().filter_map(|k| self.remove(k)).collect()
    }
}

pub struct Iter<'a, T> {
    list: &'a SlotList<T>,
    cur: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (SlotKey, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == HEAD {
            return None;
        }
        let slot = &self.list.slots[self.cur];
        let key = SlotKey {
            index: self.cur as u32,
            generation: slot.generation,
        };
        self.cur = slot.next;
        slot.value.as_ref().map(|v| (key, v))
    }
}
