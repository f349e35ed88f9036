#![cfg(test)]

// Property tests for HandleMap kept inside the crate so they can reach the
// sparse table directly.

use crate::defragment::SwapBudget;
use crate::handle::Handle;
use crate::handle_map::HandleMap;
use crate::sparse::Slot;
use proptest::prelude::*;
use slotmap::{DefaultKey, SlotMap};
use std::collections::{BTreeMap, BTreeSet};

// Handle-indexed operations: indices select among handles issued so far
// (live or stale), so shrinking keeps them meaningful.
#[derive(Clone, Debug)]
enum Op {
    Insert(i32),
    InsertMany(usize, i32),
    Erase(usize),
    EraseMany(Vec<usize>),
    Mutate(usize, i32),
    Clear,
    Reset,
    Defragment(Option<usize>),
    Iterate,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        6 => any::<i32>().prop_map(Op::Insert),
        1 => (1usize..6, any::<i32>()).prop_map(|(n, v)| Op::InsertMany(n, v)),
        4 => any::<usize>().prop_map(Op::Erase),
        1 => proptest::collection::vec(any::<usize>(), 0..6).prop_map(Op::EraseMany),
        2 => (any::<usize>(), any::<i32>()).prop_map(|(i, d)| Op::Mutate(i, d)),
        1 => Just(Op::Clear),
        1 => Just(Op::Reset),
        2 => proptest::option::of(0usize..8).prop_map(Op::Defragment),
        1 => Just(Op::Iterate),
    ];
    proptest::collection::vec(op, 1..120)
}

fn pick(issued: &[(Handle, DefaultKey)], i: usize) -> Option<(Handle, DefaultKey)> {
    if issued.is_empty() {
        None
    } else {
        Some(issued[i % issued.len()])
    }
}

// Property: state-machine equivalence against a slotmap::SlotMap model.
// - `is_valid(h)` agrees with the model's view of the paired key, for live
//   and stale handles alike.
// - Live handles resolve to the last value written; erase returns 1 once.
// - Dense storage holds exactly the live values, with no gaps.
// - Every structural invariant holds after each op.
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine(ops in arb_ops()) {
        let mut sut: HandleMap<i32> = HandleMap::new(5, 0);
        let mut model: SlotMap<DefaultKey, i32> = SlotMap::new();
        let mut issued: Vec<(Handle, DefaultKey)> = Vec::new();

        for op in ops {
            match op {
                Op::Insert(v) => {
                    let h = sut.insert(v);
                    prop_assert_eq!(h.type_id(), 5);
                    prop_assert!(h.generation() > 0);
                    issued.push((h, model.insert(v)));
                }
                Op::InsertMany(n, v) => {
                    let hs = sut.insert_many(n, || v).expect("n > 0");
                    prop_assert_eq!(hs.len(), n);
                    for h in hs {
                        issued.push((h, model.insert(v)));
                    }
                }
                Op::Erase(i) => {
                    if let Some((h, k)) = pick(&issued, i) {
                        let expected = model.remove(k).is_some() as usize;
                        prop_assert_eq!(sut.erase(h), expected);
                    }
                }
                Op::EraseMany(is) => {
                    let picked: Vec<_> = is.iter().filter_map(|&i| pick(&issued, i)).collect();
                    let expected: usize = picked
                        .iter()
                        .map(|&(_, k)| model.remove(k).is_some() as usize)
                        .sum();
                    let hs: Vec<Handle> = picked.iter().map(|&(h, _)| h).collect();
                    prop_assert_eq!(sut.erase_many(&hs), expected);
                }
                Op::Mutate(i, d) => {
                    if let Some((h, k)) = pick(&issued, i) {
                        match (h.get_mut(&mut sut), model.get_mut(k)) {
                            (Some(s), Some(m)) => {
                                *s = s.wrapping_add(d);
                                *m = m.wrapping_add(d);
                            }
                            (None, None) => {}
                            (s, m) => prop_assert!(false, "liveness diverged: {:?} vs {:?}", s, m),
                        }
                    }
                }
                Op::Clear => {
                    sut.clear();
                    model.clear();
                }
                Op::Reset => {
                    // Old handles may alias after reset; stop tracking them.
                    sut.reset();
                    model.clear();
                    issued.clear();
                }
                Op::Defragment(budget) => {
                    let budget = budget.map_or(SwapBudget::Unlimited, SwapBudget::Limited);
                    // In-place mutation does not mark the map fragmented.
                    let was_fragmented = sut.is_fragmented();
                    let status = sut.defragment(budget);
                    if let SwapBudget::Limited(n) = budget {
                        prop_assert!(status.relocations() <= n);
                    }
                    if status.is_complete() && was_fragmented {
                        prop_assert!(sut.items().windows(2).all(|w| w[0] <= w[1]));
                        prop_assert!(!sut.is_fragmented());
                    }
                }
                Op::Iterate => {
                    let seen: BTreeMap<Handle, i32> = sut.iter().map(|(h, &v)| (h, v)).collect();
                    prop_assert_eq!(seen.len(), sut.len());
                    for (h, v) in seen {
                        prop_assert_eq!(sut.get(h), Some(&v));
                    }
                }
            }

            // Post-conditions after each op
            prop_assert_eq!(sut.check_consistency(), Ok(()));
            prop_assert_eq!(sut.len(), model.len());
            for &(h, k) in &issued {
                prop_assert_eq!(sut.get(h), model.get(k));
            }
            let mut dense: Vec<i32> = sut.items().to_vec();
            let mut expected: Vec<i32> = model.values().copied().collect();
            dense.sort_unstable();
            expected.sort_unstable();
            prop_assert_eq!(dense, expected);
        }
    }
}

// Property: generations of a slot only move forward, and a freed outer index
// is never handed out again while older freed indices are waiting.
proptest! {
    #[test]
    fn prop_reuse_is_fifo_and_generations_grow(
        script in proptest::collection::vec(any::<bool>(), 1..200)
    ) {
        let mut sut: HandleMap<u8> = HandleMap::new(0, 0);
        let mut live: Vec<Handle> = Vec::new();
        let mut freed: std::collections::VecDeque<u32> = Default::default();
        let mut last_gen: BTreeMap<u32, u16> = BTreeMap::new();

        for (step, insert) in script.into_iter().enumerate() {
            if insert || live.is_empty() {
                let h = sut.insert(0);
                if let Some(expected) = freed.pop_front() {
                    prop_assert_eq!(h.index(), expected, "oldest freed slot reused first");
                }
                if let Some(&g) = last_gen.get(&h.index()) {
                    prop_assert!(h.generation() > g);
                }
                last_gen.insert(h.index(), h.generation());
                live.push(h);
            } else {
                let h = live.swap_remove(step % live.len());
                prop_assert_eq!(sut.erase(h), 1);
                freed.push_back(h.index());
            }
        }

        let free_slots: BTreeSet<u32> = sut
            .ids()
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Free { .. }))
            .map(|(i, _)| i as u32)
            .collect();
        prop_assert_eq!(free_slots, freed.iter().copied().collect::<BTreeSet<_>>());
        prop_assert_eq!(sut.free_list_front(), freed.front().copied());
        prop_assert_eq!(sut.free_list_back(), freed.back().copied());
    }
}
