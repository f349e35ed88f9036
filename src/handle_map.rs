//! HandleMap: dense item storage addressed through generational handles.

use crate::error::{HandleError, InsertError, InvariantViolation};
use crate::handle::{Handle, HandleSet, TYPE_ID_MAX};
use crate::sparse::{Slot, SparseTable};
use core::fmt;
use core::ops::{Index, IndexMut};

/// Per-item metadata stored alongside dense storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Meta {
    /// Sparse-table slot that currently maps to this dense position.
    pub dense_to_sparse: u32,
}

/// Items of one type stored contiguously, addressed by stable [`Handle`]s.
///
/// Removal swaps the last item into the vacated position, so dense order
/// changes over time; [`HandleMap::defragment_by`] restores a caller-chosen
/// order incrementally.
pub struct HandleMap<T> {
    type_id: u16,
    pub(crate) fragmented: bool,
    pub(crate) sparse: SparseTable,
    pub(crate) items: Vec<T>,
    pub(crate) meta: Vec<Meta>,
}

/// Iterator over `(Handle, &T)` in dense order.
pub struct Iter<'a, T> {
    items: core::slice::Iter<'a, T>,
    meta: core::slice::Iter<'a, Meta>,
    slots: &'a [Slot],
    type_id: u16,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Handle, &'a T);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.next()?;
        let meta = self.meta.next()?;
        Some((outer_handle(self.slots, meta, self.type_id), item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

/// Iterator over `(Handle, &mut T)` in dense order.
pub struct IterMut<'a, T> {
    items: core::slice::IterMut<'a, T>,
    meta: core::slice::Iter<'a, Meta>,
    slots: &'a [Slot],
    type_id: u16,
}

impl<'a, T> Iterator for IterMut<'a, T> {
    type Item = (Handle, &'a mut T);
    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.next()?;
        let meta = self.meta.next()?;
        Some((outer_handle(self.slots, meta, self.type_id), item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}

#[inline]
fn outer_handle(slots: &[Slot], meta: &Meta, type_id: u16) -> Handle {
    let generation = slots[meta.dense_to_sparse as usize].generation();
    Handle::outer(meta.dense_to_sparse, generation, type_id)
}

impl<T> HandleMap<T> {
    /// Create an empty map tagging its handles with `type_id`, with room for
    /// `reserve` items before reallocating.
    ///
    /// # Panics
    ///
    /// If `type_id` does not fit in 15 bits.
    pub fn new(type_id: u16, reserve: usize) -> Self {
        assert!(
            type_id <= TYPE_ID_MAX,
            "type id {type_id} exceeds {TYPE_ID_MAX}"
        );
        Self {
            type_id,
            fragmented: false,
            sparse: SparseTable::with_capacity(reserve),
            items: Vec::with_capacity(reserve),
            meta: Vec::with_capacity(reserve),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.items.reserve(additional);
        self.meta.reserve(additional);
        self.sparse.reserve(additional);
    }

    /// Store `item`, returning its handle. Fails only when every outer index
    /// is in use.
    pub fn try_insert(&mut self, item: T) -> Result<Handle, InsertError> {
        if self.sparse.is_exhausted() {
            return Err(InsertError::IndexSpaceExhausted);
        }
        self.fragmented = true;

        let dense = self.items.len() as u32;
        let (outer, generation) = self.sparse.allocate(dense);
        self.items.push(item);
        self.meta.push(Meta {
            dense_to_sparse: outer,
        });
        Ok(Handle::outer(outer, generation, self.type_id))
    }

    /// Store `item`, returning its handle.
    ///
    /// # Panics
    ///
    /// If the outer index space (`u32::MAX` slots) is exhausted.
    pub fn insert(&mut self, item: T) -> Handle {
        match self.try_insert(item) {
            Ok(h) => h,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn insert_cloned(&mut self, item: &T) -> Handle
    where
        T: Clone,
    {
        self.insert(item.clone())
    }

    /// Store the value produced by `make`.
    pub fn insert_with<F>(&mut self, make: F) -> Handle
    where
        F: FnOnce() -> T,
    {
        self.insert(make())
    }

    /// Store `n` items produced by `make`, reserving space once up front.
    pub fn insert_many<F>(&mut self, n: usize, mut make: F) -> Result<HandleSet, InsertError>
    where
        F: FnMut() -> T,
    {
        if n == 0 {
            return Err(InsertError::EmptyBatch);
        }
        self.fragmented = true;
        self.items.reserve(n);
        self.meta.reserve(n);

        let mut handles = HandleSet::with_capacity(n);
        for _ in 0..n {
            handles.push(self.try_insert(make())?);
        }
        Ok(handles)
    }

    /// Remove and return the item behind `handle`. Stale or foreign handles
    /// are ignored.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }
        self.fragmented = true;

        let dense = self.sparse.release(handle.index()) as usize;

        // Swap-remove; the item moved into `dense` needs its slot repointed.
        let item = self.items.swap_remove(dense);
        self.meta.swap_remove(dense);
        if let Some(moved) = self.meta.get(dense) {
            self.sparse.set_dense(moved.dense_to_sparse, dense as u32);
        }
        Some(item)
    }

    /// Remove the item behind `handle`, returning how many were removed (0 or 1).
    pub fn erase(&mut self, handle: Handle) -> usize {
        self.remove(handle).is_some() as usize
    }

    /// Erase every handle in `handles`. Duplicates and stale handles count zero.
    pub fn erase_many(&mut self, handles: &[Handle]) -> usize {
        handles.iter().map(|&h| self.erase(h)).sum()
    }

    /// Remove all items and free every slot, bumping each generation so that
    /// all previously issued handles go stale. Linear in the number of slots.
    pub fn clear(&mut self) {
        log::debug!(
            "clearing handle map (type id {}, {} items, {} slots)",
            self.type_id,
            self.items.len(),
            self.sparse.len()
        );
        self.items.clear();
        self.meta.clear();
        self.sparse.rethread_all();
        self.fragmented = false;
    }

    /// Remove all items and drop the sparse table. Constant time apart from
    /// dropping items, keeps capacity, but handles issued before the reset
    /// may alias handles issued after it. Use [`HandleMap::clear`] when stale
    /// handles must be detected.
    pub fn reset(&mut self) {
        log::debug!(
            "resetting handle map (type id {}, {} items)",
            self.type_id,
            self.items.len()
        );
        self.items.clear();
        self.meta.clear();
        self.sparse.reset();
        self.fragmented = false;
    }

    /// Resolve `handle` to its dense position or say why it cannot be.
    fn resolve(&self, handle: Handle) -> Result<usize, HandleError> {
        let index = handle.index();
        let slot = self.sparse.get(index).ok_or(HandleError::OutOfRange {
            index,
            len: self.sparse.len(),
        })?;
        if handle.type_id() != self.type_id {
            return Err(HandleError::TypeMismatch {
                expected: self.type_id,
                found: handle.type_id(),
            });
        }
        match *slot {
            Slot::Occupied { dense, generation } => {
                if handle.generation() != generation {
                    return Err(HandleError::StaleGeneration {
                        current: generation,
                        found: handle.generation(),
                    });
                }
                debug_assert!((dense as usize) < self.items.len(), "inner index out of range");
                Ok(dense as usize)
            }
            Slot::Free { generation, .. } if handle.generation() != generation => {
                Err(HandleError::StaleGeneration {
                    current: generation,
                    found: handle.generation(),
                })
            }
            Slot::Free { .. } => Err(HandleError::Vacant { index }),
        }
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        self.resolve(handle).is_ok()
    }

    pub fn try_get(&self, handle: Handle) -> Result<&T, HandleError> {
        let dense = self.resolve(handle)?;
        Ok(&self.items[dense])
    }

    pub fn try_get_mut(&mut self, handle: Handle) -> Result<&mut T, HandleError> {
        let dense = self.resolve(handle)?;
        Ok(&mut self.items[dense])
    }

    /// Current dense position of `handle`, for external index-based structures.
    pub fn try_inner_index(&self, handle: Handle) -> Result<u32, HandleError> {
        self.resolve(handle).map(|d| d as u32)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.try_get(handle).ok()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.try_get_mut(handle).ok()
    }

    /// # Panics
    ///
    /// If `handle` is not valid for this map.
    pub fn at(&self, handle: Handle) -> &T {
        match self.try_get(handle) {
            Ok(item) => item,
            Err(e) => panic!("at called with invalid handle: {e}"),
        }
    }

    /// # Panics
    ///
    /// If `handle` is not valid for this map.
    pub fn at_mut(&mut self, handle: Handle) -> &mut T {
        match self.try_get_mut(handle) {
            Ok(item) => item,
            Err(e) => panic!("at_mut called with invalid handle: {e}"),
        }
    }

    /// # Panics
    ///
    /// If `handle` is not valid for this map.
    pub fn inner_index(&self, handle: Handle) -> u32 {
        match self.try_inner_index(handle) {
            Ok(i) => i,
            Err(e) => panic!("inner_index called with invalid handle: {e}"),
        }
    }

    /// Look up without checking type id, generation or bounds.
    ///
    /// # Safety
    ///
    /// `handle` must be valid for this map (`is_valid(handle)` is true).
    #[inline]
    pub unsafe fn get_unchecked(&self, handle: Handle) -> &T {
        debug_assert!(self.is_valid(handle), "get_unchecked called with invalid handle");
        match *self.sparse.slots().get_unchecked(handle.index() as usize) {
            Slot::Occupied { dense, .. } => self.items.get_unchecked(dense as usize),
            Slot::Free { .. } => core::hint::unreachable_unchecked(),
        }
    }

    /// Mutable variant of [`HandleMap::get_unchecked`].
    ///
    /// # Safety
    ///
    /// `handle` must be valid for this map (`is_valid(handle)` is true).
    #[inline]
    pub unsafe fn get_unchecked_mut(&mut self, handle: Handle) -> &mut T {
        debug_assert!(self.is_valid(handle), "get_unchecked_mut called with invalid handle");
        match *self.sparse.slots().get_unchecked(handle.index() as usize) {
            Slot::Occupied { dense, .. } => self.items.get_unchecked_mut(dense as usize),
            Slot::Free { .. } => core::hint::unreachable_unchecked(),
        }
    }

    /// Items and handles in dense order. Inserting or erasing while iterating
    /// is ruled out by the borrow.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            items: self.items.iter(),
            meta: self.meta.iter(),
            slots: self.sparse.slots(),
            type_id: self.type_id,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            items: self.items.iter_mut(),
            meta: self.meta.iter(),
            slots: self.sparse.slots(),
            type_id: self.type_id,
        }
    }

    /// Handles of every live item, in dense order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.iter().map(|(h, _)| h)
    }

    // Raw access for bulk algorithms. Only the items are mutable; the
    // structural arrays are read-only so they cannot be desynchronized.

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Mutating items in place does not mark the map fragmented; call
    /// [`HandleMap::mark_fragmented`] if the defragment order key changed.
    pub fn items_mut(&mut self) -> &mut [T] {
        &mut self.items
    }

    pub fn meta(&self) -> &[Meta] {
        &self.meta
    }

    pub fn ids(&self) -> &[Slot] {
        self.sparse.slots()
    }

    pub fn free_list_front(&self) -> Option<u32> {
        self.sparse.free_list().front
    }

    pub fn free_list_back(&self) -> Option<u32> {
        self.sparse.free_list().back
    }

    pub fn item_type_id(&self) -> u16 {
        self.type_id
    }

    /// Verify every structural invariant. Linear in the number of slots.
    pub fn check_consistency(&self) -> Result<(), InvariantViolation> {
        let (items, meta) = (self.items.len(), self.meta.len());
        if items != meta {
            return Err(InvariantViolation::DenseLengthMismatch { items, meta });
        }
        if self.sparse.len() < items {
            return Err(InvariantViolation::SparseTooSmall {
                sparse: self.sparse.len(),
                dense: items,
            });
        }
        for (dense, m) in self.meta.iter().enumerate() {
            match self.sparse.get(m.dense_to_sparse) {
                Some(Slot::Occupied { dense: d, .. }) if *d as usize == dense => {}
                _ => {
                    return Err(InvariantViolation::BrokenBackReference {
                        dense,
                        outer: m.dense_to_sparse,
                    })
                }
            }
        }
        let mut free = 0;
        for (outer, slot) in self.sparse.slots().iter().enumerate() {
            match *slot {
                Slot::Occupied { dense, .. } if dense as usize >= items => {
                    return Err(InvariantViolation::DanglingSlot {
                        outer: outer as u32,
                        dense,
                        len: items,
                    })
                }
                Slot::Occupied { .. } => {}
                Slot::Free { .. } => free += 1,
            }
        }
        let chain = self
            .sparse
            .walk_free_list()
            .map_err(|at| InvariantViolation::BrokenFreeList { at })?;
        if chain.len() != free {
            return Err(InvariantViolation::FreeListIncomplete {
                reached: chain.len(),
                free,
            });
        }
        let back = self.sparse.free_list().back;
        if chain.last().copied() != back {
            return Err(InvariantViolation::FreeListBack {
                expected: chain.last().copied(),
                found: back,
            });
        }
        Ok(())
    }
}

impl<T> Index<Handle> for HandleMap<T> {
    type Output = T;
    fn index(&self, handle: Handle) -> &T {
        self.at(handle)
    }
}

impl<T> IndexMut<Handle> for HandleMap<T> {
    fn index_mut(&mut self, handle: Handle) -> &mut T {
        self.at_mut(handle)
    }
}

impl<'a, T> IntoIterator for &'a HandleMap<T> {
    type Item = (Handle, &'a T);
    type IntoIter = Iter<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut HandleMap<T> {
    type Item = (Handle, &'a mut T);
    type IntoIter = IterMut<'a, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for HandleMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleMap")
            .field("type_id", &self.type_id)
            .field("fragmented", &self.fragmented)
            .field("items", &self.items)
            .field("free_list", &self.sparse.free_list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn outer_indices(hs: &[Handle]) -> Vec<u32> {
        hs.iter().map(|h| h.index()).collect()
    }

    /// Invariant: the first handles are issued at consecutive indices, generation 1.
    #[test]
    fn insert_issues_fresh_slots_in_order() {
        let mut m = HandleMap::new(3, 4);
        let hs: Vec<_> = [10, 20, 30].into_iter().map(|v| m.insert(v)).collect();
        assert_eq!(outer_indices(&hs), vec![0, 1, 2]);
        assert!(hs.iter().all(|h| h.generation() == 1 && h.type_id() == 3));
        assert_eq!(m.items(), &[10, 20, 30]);
        assert_eq!(m.check_consistency(), Ok(()));
    }

    /// Invariant: the swapped-in item's slot is repointed, not the removed one's.
    #[test]
    fn remove_fixes_back_reference_of_swapped_item() {
        let mut m = HandleMap::new(0, 0);
        let a = m.insert('a');
        let b = m.insert('b');
        let c = m.insert('c');

        assert_eq!(m.remove(a), Some('a'));
        assert_eq!(m.items(), &['c', 'b']);
        assert_eq!(m.inner_index(c), 0);
        assert_eq!(m.inner_index(b), 1);
        assert_eq!(m[c], 'c');
        assert_eq!(m.meta()[0], Meta { dense_to_sparse: c.index() });
        assert_eq!(m.check_consistency(), Ok(()));
    }

    /// Invariant: removing the last dense item needs no swap.
    #[test]
    fn remove_last_item_and_only_item() {
        let mut m = HandleMap::new(0, 0);
        let a = m.insert(1);
        let b = m.insert(2);
        assert_eq!(m.erase(b), 1);
        assert_eq!(m.items(), &[1]);
        assert_eq!(m.erase(a), 1);
        assert!(m.is_empty());
        assert_eq!(m.check_consistency(), Ok(()));
    }

    /// Invariant: erase on a stale handle is a no-op reporting zero.
    #[test]
    fn erase_stale_handle_is_noop() {
        let mut m = HandleMap::new(1, 0);
        let h = m.insert(5);
        assert_eq!(m.erase(h), 1);
        assert_eq!(m.erase(h), 0);
        assert_eq!(m.erase(Handle::outer(99, 1, 1)), 0);
        assert_eq!(m.erase(Handle::NULL), 0);
        assert_eq!(m.free_list_front(), Some(0));
        assert_eq!(m.check_consistency(), Ok(()));
    }

    #[test]
    fn lookup_errors_are_specific() {
        let mut m = HandleMap::new(2, 0);
        let h = m.insert("x");

        assert_eq!(
            m.try_get(Handle::outer(5, 1, 2)),
            Err(HandleError::OutOfRange { index: 5, len: 1 })
        );
        assert_eq!(
            m.try_get(Handle::outer(0, 1, 7)),
            Err(HandleError::TypeMismatch { expected: 2, found: 7 })
        );
        m.erase(h);
        assert_eq!(
            m.try_get(h),
            Err(HandleError::StaleGeneration { current: 2, found: 1 })
        );
        assert_eq!(
            m.try_get(Handle::outer(0, 2, 2)),
            Err(HandleError::Vacant { index: 0 })
        );
    }

    #[test]
    fn at_panics_on_stale_handle() {
        let mut m = HandleMap::new(0, 0);
        let h = m.insert(1u8);
        m.erase(h);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = m.at(h);
        }));
        assert!(res.is_err(), "at on an erased handle must panic");
    }

    #[test]
    fn get_unchecked_matches_checked_lookup() {
        let mut m = HandleMap::new(0, 0);
        let hs: Vec<_> = (0..5).map(|v| m.insert(v * 3)).collect();
        m.erase(hs[1]);
        for &h in hs.iter().filter(|&&h| m.is_valid(h)) {
            let v = unsafe { *m.get_unchecked(h) };
            assert_eq!(Some(&v), m.get(h));
        }
        unsafe { *m.get_unchecked_mut(hs[4]) += 1 };
        assert_eq!(m[hs[4]], 13);
    }

    #[test]
    fn insert_many_reserves_and_rejects_empty_batch() {
        let mut m: HandleMap<u32> = HandleMap::new(0, 0);
        assert_eq!(m.insert_many(0, || 1), Err(InsertError::EmptyBatch));
        assert!(!m.is_fragmented());

        let mut next = 0;
        let hs = m
            .insert_many(4, || {
                next += 1;
                next
            })
            .unwrap();
        assert_eq!(hs.len(), 4);
        assert!(m.capacity() >= 4);
        assert_eq!(hs.iter().map(|&h| m[h]).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn iteration_yields_resolvable_handles() {
        let mut m = HandleMap::new(4, 0);
        let hs: Vec<_> = (0..6).map(|v| m.insert(v)).collect();
        m.erase(hs[0]);
        m.erase(hs[3]);

        for (h, v) in m.iter() {
            assert_eq!(m.get(h), Some(v));
        }
        for (_, v) in &mut m {
            *v *= 10;
        }
        let seen: BTreeSet<_> = m.handles().map(|h| m[h]).collect();
        assert_eq!(seen, BTreeSet::from([10, 20, 40, 50]));
        assert_eq!(m.iter().len(), 4);
    }

    #[test]
    fn ids_expose_packed_inner_view() {
        let mut m = HandleMap::new(6, 0);
        let a = m.insert(());
        let _b = m.insert(());
        m.erase(a);
        let inner = m.ids()[0].inner_id(m.item_type_id());
        assert!(inner.is_free());
        assert_eq!(inner.generation(), 2);
        assert_eq!(inner.index(), crate::handle::FREE_LIST_END);
        assert_eq!(m.free_list_back(), Some(0));
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn oversized_type_id_panics() {
        let _m: HandleMap<u8> = HandleMap::new(0x8000, 0);
    }
}
