//! Slot arena with free-list reuse.
//!
//! Segments, sections, lines and nodes live in arenas and refer to each
//! other by typed indices instead of pointers. Freed slots are recycled in
//! LIFO order, so an id is only valid while its record is linked into the
//! tree.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

pub(crate) trait ArenaId: Copy + Eq + Debug {
    fn from_slot(slot: u32) -> Self;
    fn slot(self) -> usize;
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $vis:vis $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name(u32);

        impl ArenaId for $name {
            fn from_slot(slot: u32) -> Self {
                Self(slot)
            }

            fn slot(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id!(
    /// Handle to a segment in a line's chain.
    pub(crate) SegId
);
arena_id!(
    /// Handle to a section of a line's chain.
    pub(crate) SectionId
);
arena_id!(
    /// Handle to a line record.
    pub(crate) LineId
);
arena_id!(
    /// Opaque handle to a tree node.
    pub NodeId
);

#[derive(Clone, Debug)]
pub(crate) struct Arena<I, T> {
    slots: Vec<Option<T>>,
    free_list: Vec<u32>,
    live: usize,
    _id: PhantomData<I>,
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            _id: PhantomData,
        }
    }

    pub(crate) fn alloc(&mut self, value: T) -> I {
        self.live += 1;
        if let Some(slot) = self.free_list.pop() {
            self.slots[slot as usize] = Some(value);
            return I::from_slot(slot);
        }
        let slot = u32::try_from(self.slots.len()).expect("arena exceeded u32 slots");
        self.slots.push(Some(value));
        I::from_slot(slot)
    }

    pub(crate) fn free(&mut self, id: I) -> T {
        let value = self.slots[id.slot()]
            .take()
            .unwrap_or_else(|| panic!("double free of {id:?}"));
        self.live -= 1;
        self.free_list.push(id.slot() as u32);
        value
    }

    pub(crate) fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.slot()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.slot()).and_then(Option::as_mut)
    }

    pub(crate) fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Number of live records.
    pub(crate) const fn len(&self) -> usize {
        self.live
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (I::from_slot(i as u32), v)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (I::from_slot(i as u32), v)))
    }
}

impl<I: ArenaId, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        self.slots
            .get(id.slot())
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("stale arena id {id:?}"))
    }
}

impl<I: ArenaId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        self.slots
            .get_mut(id.slot())
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("stale arena id {id:?}"))
    }
}
