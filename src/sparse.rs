//! Sparse table: outer index -> dense position, with an embedded FIFO free-list.
//!
//! Every outer id ever issued owns one [`Slot`]. Occupied slots point into
//! dense storage; free slots link to the next free slot, so the free-list
//! costs no memory beyond the table itself. Freed slots are appended at the
//! back and reused from the front, which spreads generation increments over
//! all slots instead of hammering the most recently freed one.

use crate::handle::{Handle, FREE_LIST_END};

/// One sparse-table entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Slot {
    Occupied { dense: u32, generation: u16 },
    Free { next: Option<u32>, generation: u16 },
}

impl Slot {
    #[inline]
    pub fn generation(&self) -> u16 {
        match *self {
            Slot::Occupied { generation, .. } | Slot::Free { generation, .. } => generation,
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self, Slot::Free { .. })
    }

    /// Packed inner-id view of this slot: the dense position when occupied,
    /// otherwise the next free slot or [`FREE_LIST_END`].
    pub fn inner_id(&self, type_id: u16) -> Handle {
        match *self {
            Slot::Occupied { dense, generation } => Handle::new(dense, generation, type_id, false),
            Slot::Free { next, generation } => {
                Handle::new(next.unwrap_or(FREE_LIST_END), generation, type_id, true)
            }
        }
    }
}

/// Generation following `g`. Zero is skipped so the null handle never matches.
#[inline]
pub(crate) fn next_generation(g: u16) -> u16 {
    match g.wrapping_add(1) {
        0 => 1,
        n => n,
    }
}

/// Head and tail of the embedded free-list. Both are `None` when empty.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FreeList {
    pub front: Option<u32>,
    pub back: Option<u32>,
}

impl FreeList {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }
}

/// Largest number of slots: `FREE_LIST_END` stays reserved for the packed view.
pub(crate) const MAX_SLOTS: usize = FREE_LIST_END as usize;

#[derive(Debug, Default)]
pub(crate) struct SparseTable {
    slots: Vec<Slot>,
    free: FreeList,
}

impl SparseTable {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            slots: Vec::with_capacity(n),
            free: FreeList::default(),
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    #[inline]
    pub(crate) fn free_list(&self) -> FreeList {
        self.free
    }

    #[inline]
    pub(crate) fn get(&self, outer: u32) -> Option<&Slot> {
        self.slots.get(outer as usize)
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }

    /// True when `allocate` would need a fresh slot and none is left.
    #[inline]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.free.is_empty() && self.slots.len() >= MAX_SLOTS
    }

    /// Claim a slot for an item stored at `dense`, preferring the oldest
    /// freed slot. Returns the outer index and its generation.
    ///
    /// Callers check [`Self::is_exhausted`] first.
    pub(crate) fn allocate(&mut self, dense: u32) -> (u32, u16) {
        match self.free.front {
            None => {
                let outer = self.slots.len() as u32;
                self.slots.push(Slot::Occupied { dense, generation: 1 });
                (outer, 1)
            }
            Some(outer) => {
                let slot = &mut self.slots[outer as usize];
                let (next, generation) = match *slot {
                    Slot::Free { next, generation } => (next, generation),
                    Slot::Occupied { .. } => unreachable!("free-list links an occupied slot"),
                };
                *slot = Slot::Occupied { dense, generation };
                self.free.front = next;
                if next.is_none() {
                    self.free.back = None;
                }
                (outer, generation)
            }
        }
    }

    /// Return `outer` to the back of the free-list, bumping its generation.
    /// Returns the dense position the slot pointed at.
    pub(crate) fn release(&mut self, outer: u32) -> u32 {
        let slot = &mut self.slots[outer as usize];
        let (dense, generation) = match *slot {
            Slot::Occupied { dense, generation } => (dense, generation),
            Slot::Free { .. } => unreachable!("releasing a free slot"),
        };
        *slot = Slot::Free {
            next: None,
            generation: next_generation(generation),
        };

        match self.free.back {
            None => {
                self.free.front = Some(outer);
            }
            Some(back) => {
                if let Slot::Free { next, .. } = &mut self.slots[back as usize] {
                    *next = Some(outer);
                }
            }
        }
        self.free.back = Some(outer);
        dense
    }

    /// Repoint an occupied slot at a new dense position.
    #[inline]
    pub(crate) fn set_dense(&mut self, outer: u32, to: u32) {
        if let Slot::Occupied { dense, .. } = &mut self.slots[outer as usize] {
            *dense = to;
        }
    }

    /// Free every slot, bump every generation and chain them in index order.
    pub(crate) fn rethread_all(&mut self) {
        let n = self.slots.len();
        if n == 0 {
            return;
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let next = if i + 1 < n { Some(i as u32 + 1) } else { None };
            *slot = Slot::Free {
                next,
                generation: next_generation(slot.generation()),
            };
        }
        self.free = FreeList {
            front: Some(0),
            back: Some(n as u32 - 1),
        };
    }

    /// Drop every slot. Capacity is kept.
    pub(crate) fn reset(&mut self) {
        self.slots.clear();
        self.free = FreeList::default();
    }

    /// Walk the free-list from the front, returning the visited indices or
    /// the first index that breaks the chain.
    pub(crate) fn walk_free_list(&self) -> Result<Vec<u32>, u32> {
        let mut seen = Vec::new();
        let mut visited = vec![false; self.slots.len()];
        let mut cur = self.free.front;
        while let Some(i) = cur {
            match self.slots.get(i as usize) {
                Some(Slot::Free { next, .. }) if !visited[i as usize] => {
                    visited[i as usize] = true;
                    seen.push(i);
                    cur = *next;
                }
                _ => return Err(i),
            }
        }
        Ok(seen)
    }
}
