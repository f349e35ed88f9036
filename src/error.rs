//! Error types for handle lookups, inserts and consistency checks.

use thiserror::Error;

/// Why a handle does not resolve to an item.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum HandleError {
    #[error("outer index {index} out of range ({len} slots)")]
    OutOfRange { index: u32, len: usize },

    #[error("handle type id {found} does not match container type id {expected}")]
    TypeMismatch { expected: u16, found: u16 },

    #[error("stale handle: generation {found}, slot is at generation {current}")]
    StaleGeneration { current: u16, found: u16 },

    #[error("slot {index} is on the free-list")]
    Vacant { index: u32 },
}

#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum InsertError {
    #[error("batch insert called with zero items")]
    EmptyBatch,

    #[error("outer index space exhausted")]
    IndexSpaceExhausted,
}

/// A broken structural invariant, reported by `HandleMap::check_consistency`.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InvariantViolation {
    #[error("dense arrays differ in length: {items} items, {meta} meta entries")]
    DenseLengthMismatch { items: usize, meta: usize },

    #[error("sparse table ({sparse}) smaller than dense storage ({dense})")]
    SparseTooSmall { sparse: usize, dense: usize },

    #[error("dense position {dense} back-references slot {outer}, which does not point back")]
    BrokenBackReference { dense: usize, outer: u32 },

    #[error("occupied slot {outer} points at dense position {dense} beyond {len} items")]
    DanglingSlot { outer: u32, dense: u32, len: usize },

    #[error("free-list is broken at slot {at}")]
    BrokenFreeList { at: u32 },

    #[error("free-list reaches {reached} of {free} free slots")]
    FreeListIncomplete { reached: usize, free: usize },

    #[error("free-list back is {found:?}, expected {expected:?}")]
    FreeListBack { expected: Option<u32>, found: Option<u32> },
}
