//! handle-map: a single-threaded object pool that stores items densely
//! and hands out generational handles that survive items moving around.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: cache-friendly iteration over a packed `Vec<T>` while callers
//!   keep stable, validity-checked references to individual items.
//! - Layers:
//!   - Handle: packed `u64` (index, generation, type id, free bit) with a
//!     single-comparison total order.
//!   - Sparse table: one slot per outer id ever issued, either pointing at
//!     a dense position or linked into an embedded FIFO free-list.
//!   - Dense storage: items plus a parallel back-reference array naming
//!     the sparse slot that owns each position. Erase is swap-remove.
//!   - Defragment: budgeted, resumable insertion sort over dense storage.
//!
//! Constraints
//! - Single-threaded: no internal synchronization. `HandleMap<T>` is
//!   `Send`/`Sync` exactly when `T` is; concurrent use needs external
//!   serialization.
//! - Handles are plain values. Holding one does not keep an item alive.
//! - Stale handles are detected by generation: every free bumps the slot's
//!   generation, and generation 0 is never issued, so `Handle::NULL` never
//!   resolves.
//! - Inserts and erases move items in dense storage; iteration borrows the
//!   map, so mutating the set of items while iterating does not compile.
//!
//! Failure model
//! - Erasing a stale, foreign or out-of-range handle is a no-op that
//!   reports zero removals.
//! - `try_get` and friends report why a handle does not resolve.
//!   `at`/`Index` panic on an invalid handle. `get_unchecked` skips all
//!   verification and is `unsafe`.
//!
//! Clear vs. reset
//! - `clear` keeps the sparse table, bumps every generation and rethreads
//!   the free-list, so old handles stay detectably stale.
//! - `reset` drops the sparse table too; old handles may alias new ones.
//!
//! Notes and non-goals
//! - No serialization of handles or storage.
//! - Defragmentation runs only when the caller asks for it.

pub mod defragment;
mod error;
pub mod handle;
pub mod handle_map;
mod handle_map_proptest;
pub mod sparse;

// Public surface
pub use defragment::{DefragStatus, SwapBudget};
pub use error::{HandleError, InsertError, InvariantViolation};
pub use handle::{Handle, HandleSet};
pub use handle_map::{HandleMap, Meta};
pub use sparse::{FreeList, Slot};
