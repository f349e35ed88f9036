//! Resumable defragmentation of dense storage.
//!
//! An insertion sort over the dense arrays. Each relocation moves one item
//! one position left and immediately repoints both affected sparse slots,
//! so the map satisfies every structural invariant between any two
//! relocations. That is what makes the pass interruptible: when the budget
//! runs out the call simply returns, and the next call restarts the outer
//! loop. The already-ordered prefix costs one comparison per item to skip.

use crate::handle_map::HandleMap;
use core::cmp::Ordering;

/// Upper bound on relocations performed by one defragment call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SwapBudget {
    Unlimited,
    Limited(usize),
}

/// Outcome of a defragment call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DefragStatus {
    /// Dense storage is fully ordered; the map is no longer fragmented.
    Complete { relocations: usize },
    /// The budget ran out; call again to continue.
    Paused { relocations: usize },
}

impl DefragStatus {
    pub fn relocations(&self) -> usize {
        match *self {
            DefragStatus::Complete { relocations } | DefragStatus::Paused { relocations } => {
                relocations
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, DefragStatus::Complete { .. })
    }
}

impl<T> HandleMap<T> {
    /// True if an insert or erase happened since the last completed pass.
    pub fn is_fragmented(&self) -> bool {
        self.fragmented
    }

    /// Force the next defragment call to run, e.g. after reordering keys were
    /// changed through [`HandleMap::items_mut`] or when switching predicates.
    pub fn mark_fragmented(&mut self) {
        self.fragmented = true;
    }

    /// Reorder dense storage so that no item is preceded by one that `less`
    /// says belongs after it. `less(a, b)` returns true when `a` should come
    /// before `b`, and must be a strict weak ordering.
    ///
    /// Returns immediately if the map is not fragmented. Handles stay valid
    /// throughout; only dense positions change.
    pub fn defragment_by<F>(&mut self, mut less: F, budget: SwapBudget) -> DefragStatus
    where
        F: FnMut(&T, &T) -> bool,
    {
        if !self.fragmented {
            return DefragStatus::Complete { relocations: 0 };
        }

        let limit = match budget {
            SwapBudget::Unlimited => usize::MAX,
            SwapBudget::Limited(n) => n,
        };
        let mut relocations = 0;

        for i in 1..self.items.len() {
            let mut j = i;
            while j > 0 && less(&self.items[j], &self.items[j - 1]) {
                if relocations == limit {
                    log::trace!(
                        "defragment paused at {i}/{} after {relocations} relocations",
                        self.items.len()
                    );
                    return DefragStatus::Paused { relocations };
                }
                self.swap_dense(j - 1, j);
                relocations += 1;
                j -= 1;
            }
        }

        self.fragmented = false;
        log::trace!(
            "defragment complete: {} items, {relocations} relocations",
            self.items.len()
        );
        DefragStatus::Complete { relocations }
    }

    /// [`HandleMap::defragment_by`] ordering items by a derived key.
    pub fn defragment_by_key<K, F>(&mut self, mut key: F, budget: SwapBudget) -> DefragStatus
    where
        K: Ord,
        F: FnMut(&T) -> K,
    {
        self.defragment_by(|a, b| key(a).cmp(&key(b)) == Ordering::Less, budget)
    }

    /// [`HandleMap::defragment_by`] using the items' own ordering.
    pub fn defragment(&mut self, budget: SwapBudget) -> DefragStatus
    where
        T: Ord,
    {
        self.defragment_by(|a, b| a < b, budget)
    }

    /// Swap two dense positions and repoint their sparse slots.
    fn swap_dense(&mut self, a: usize, b: usize) {
        self.items.swap(a, b);
        self.meta.swap(a, b);
        self.sparse.set_dense(self.meta[a].dense_to_sparse, a as u32);
        self.sparse.set_dense(self.meta[b].dense_to_sparse, b as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Handle;

    fn shuffled(values: &[i32]) -> (HandleMap<i32>, Vec<Handle>) {
        let mut m = HandleMap::new(1, values.len());
        let hs = values.iter().map(|&v| m.insert(v)).collect();
        (m, hs)
    }

    /// Invariant: an unlimited pass sorts and keeps every handle resolving.
    #[test]
    fn unlimited_pass_sorts_and_preserves_handles() {
        let (mut m, hs) = shuffled(&[5, 3, 9, 1, 7]);
        let status = m.defragment_by(|a, b| a < b, SwapBudget::Unlimited);
        assert!(status.is_complete());
        assert_eq!(m.items(), &[1, 3, 5, 7, 9]);
        for (h, v) in hs.iter().zip([5, 3, 9, 1, 7]) {
            assert_eq!(m[*h], v);
        }
        assert!(!m.is_fragmented());
        assert_eq!(m.check_consistency(), Ok(()));
    }

    /// Invariant: relocations count single-position moves.
    #[test]
    fn relocation_count_matches_inversions() {
        let (mut m, _) = shuffled(&[3, 2, 1]);
        let status = m.defragment(SwapBudget::Unlimited);
        assert_eq!(status, DefragStatus::Complete { relocations: 3 });
    }

    /// Invariant: an exhausted budget pauses with a consistent map, and later
    /// calls converge.
    #[test]
    fn limited_budget_pauses_then_resumes() {
        let (mut m, hs) = shuffled(&[4, 3, 2, 1, 0]);
        let first = m.defragment(SwapBudget::Limited(2));
        assert_eq!(first, DefragStatus::Paused { relocations: 2 });
        assert!(m.is_fragmented());
        assert_eq!(m.check_consistency(), Ok(()));

        let mut calls = 1;
        while !m.defragment(SwapBudget::Limited(2)).is_complete() {
            assert_eq!(m.check_consistency(), Ok(()));
            calls += 1;
            assert!(calls < 20, "defragment did not converge");
        }
        assert_eq!(m.items(), &[0, 1, 2, 3, 4]);
        for (h, v) in hs.iter().zip([4, 3, 2, 1, 0]) {
            assert_eq!(m[*h], v);
        }
    }

    #[test]
    fn zero_budget_completes_only_when_already_ordered() {
        let (mut m, _) = shuffled(&[1, 2, 3]);
        assert_eq!(
            m.defragment(SwapBudget::Limited(0)),
            DefragStatus::Complete { relocations: 0 }
        );

        let (mut m, _) = shuffled(&[2, 1]);
        assert_eq!(
            m.defragment(SwapBudget::Limited(0)),
            DefragStatus::Paused { relocations: 0 }
        );
        assert_eq!(m.items(), &[2, 1]);
    }

    /// Invariant: a clean map short-circuits even if the predicate disagrees.
    #[test]
    fn clean_map_is_not_resorted() {
        let (mut m, _) = shuffled(&[1, 2, 3]);
        m.defragment(SwapBudget::Unlimited);
        let status = m.defragment_by(|a, b| a > b, SwapBudget::Unlimited);
        assert_eq!(status, DefragStatus::Complete { relocations: 0 });
        assert_eq!(m.items(), &[1, 2, 3]);

        m.mark_fragmented();
        m.defragment_by(|a, b| a > b, SwapBudget::Unlimited);
        assert_eq!(m.items(), &[3, 2, 1]);
    }

    #[test]
    fn by_key_orders_on_derived_key() {
        let mut m = HandleMap::new(0, 0);
        let hs: Vec<_> = ["ccc", "a", "bb"].into_iter().map(|s| m.insert(s)).collect();
        m.defragment_by_key(|s| s.len(), SwapBudget::Unlimited);
        assert_eq!(m.items(), &["a", "bb", "ccc"]);
        assert_eq!(m[hs[0]], "ccc");
    }

    /// Invariant: a panicking predicate leaves the map structurally sound.
    #[test]
    fn panicking_predicate_keeps_map_consistent() {
        let (mut m, hs) = shuffled(&[6, 5, 4, 3, 2, 1]);
        let mut calls = 0;
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            m.defragment_by(
                |a, b| {
                    calls += 1;
                    if calls == 5 {
                        panic!("predicate failure");
                    }
                    a < b
                },
                SwapBudget::Unlimited,
            );
        }));
        assert!(res.is_err());
        assert_eq!(m.check_consistency(), Ok(()));
        for (h, v) in hs.iter().zip([6, 5, 4, 3, 2, 1]) {
            assert_eq!(m[*h], v);
        }
    }

    #[test]
    fn erase_after_defragment_marks_fragmented() {
        let (mut m, hs) = shuffled(&[1, 2, 3, 4]);
        m.defragment(SwapBudget::Unlimited);
        m.erase(hs[0]);
        assert!(m.is_fragmented());
        assert_eq!(m.items(), &[4, 2, 3]);
        let status = m.defragment(SwapBudget::Unlimited);
        assert_eq!(status, DefragStatus::Complete { relocations: 2 });
        assert_eq!(m.items(), &[2, 3, 4]);
    }
}
