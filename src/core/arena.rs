//! Fixed-capacity slot arena with generation-checked handles.
//!
//! Both the thread table and the client wait table are arenas of this shape.
//! A slot's payload is built once, when the arena is created, and outlives
//! every reservation of the slot. Wait events are never reallocated.

use std::collections::BTreeSet;
use std::fmt;

/// Handle to a reserved arena slot.
///
/// The generation changes every time the slot is freed, so a handle kept
/// past its release no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    index: usize,
    generation: u32,
}

impl SlotHandle {
    /// Slot index inside its table.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Reservation generation.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for SlotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct ArenaEntry<T> {
    generation: u32,
    in_use: bool,
    value: T,
}

/// Arena of `T` slots reused by index. The lowest free index is handed out first.
#[derive(Debug)]
pub(crate) struct SlotArena<T> {
    entries: Vec<ArenaEntry<T>>,
    free: BTreeSet<usize>,
}

impl<T> SlotArena<T> {
    pub(crate) fn new(capacity: usize, mut init: impl FnMut(usize) -> T) -> Self {
        Self {
            entries: (0..capacity)
                .map(|i| ArenaEntry {
                    generation: 0,
                    in_use: false,
                    value: init(i),
                })
                .collect(),
            free: (0..capacity).collect(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn in_use(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    /// Reserve the lowest free slot.
    pub(crate) fn allocate(&mut self) -> Option<(SlotHandle, &mut T)> {
        let index = self.free.pop_first()?;
        let entry = &mut self.entries[index];
        entry.in_use = true;
        Some((
            SlotHandle {
                index,
                generation: entry.generation,
            },
            &mut entry.value,
        ))
    }

    /// Free a slot. Returns `None` if the handle is stale.
    pub(crate) fn release(&mut self, handle: SlotHandle) -> Option<&mut T> {
        let entry = self.entries.get_mut(handle.index)?;
        if !entry.in_use || entry.generation != handle.generation {
            return None;
        }
        entry.in_use = false;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.insert(handle.index);
        Some(&mut entry.value)
    }

    pub(crate) fn get(&self, handle: SlotHandle) -> Option<&T> {
        self.entries
            .get(handle.index)
            .filter(|e| e.in_use && e.generation == handle.generation)
            .map(|e| &e.value)
    }

    pub(crate) fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut T> {
        self.entries
            .get_mut(handle.index)
            .filter(|e| e.in_use && e.generation == handle.generation)
            .map(|e| &mut e.value)
    }

    /// Reserved slots in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotHandle, &T)> {
        self.entries.iter().enumerate().filter(|(_, e)| e.in_use).map(|(index, e)| {
            (
                SlotHandle {
                    index,
                    generation: e.generation,
                },
                &e.value,
            )
        })
    }

    /// Reserved slots in index order, mutably.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (SlotHandle, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter(|(_, e)| e.in_use)
            .map(|(index, e)| {
                (
                    SlotHandle {
                        index,
                        generation: e.generation,
                    },
                    &mut e.value,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free_index() {
        let mut arena = SlotArena::new(4, |i| i);
        let a = arena.allocate().unwrap().0;
        let b = arena.allocate().unwrap().0;
        let c = arena.allocate().unwrap().0;
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));

        arena.release(b).unwrap();
        let d = arena.allocate().unwrap().0;
        assert_eq!(d.index(), 1);
        assert_ne!(d.generation(), b.generation());
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut arena = SlotArena::new(2, |_| ());
        let h = arena.allocate().unwrap().0;
        assert!(arena.release(h).is_some());
        assert!(arena.get(h).is_none());
        assert!(arena.release(h).is_none());
    }

    #[test]
    fn test_exhaustion() {
        let mut arena = SlotArena::new(1, |_| ());
        assert!(arena.allocate().is_some());
        assert!(arena.allocate().is_none());
        assert_eq!(arena.in_use(), 1);
        assert_eq!(arena.capacity(), 1);
    }
}
