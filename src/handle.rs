//! Handle: packed 64-bit identifier shared by outer ids and inner ids.
//!
//! Layout (least significant bit first):
//!
//! ```text
//! [ index: 32 ][ generation: 16 ][ type id: 15 ][ free: 1 ]
//! ```
//!
//! Comparing the raw `u64` orders handles by free, then type id, then
//! generation, then index.

use crate::handle_map::HandleMap;
use core::fmt;

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 16;
const TYPE_ID_BITS: u32 = 15;

const GENERATION_SHIFT: u32 = INDEX_BITS;
const TYPE_ID_SHIFT: u32 = GENERATION_SHIFT + GENERATION_BITS;
const FREE_SHIFT: u32 = TYPE_ID_SHIFT + TYPE_ID_BITS;

/// Largest type id a container can be tagged with.
pub const TYPE_ID_MAX: u16 = (1 << TYPE_ID_BITS) - 1;

/// Index value marking the end of the free-list in the packed inner-id view.
pub const FREE_LIST_END: u32 = u32::MAX;

/// Collection of handles, as returned by batch inserts.
pub type HandleSet = Vec<Handle>;

#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Handle(u64);

impl Handle {
    /// The all-zero handle. Never valid for any container.
    pub const NULL: Handle = Handle(0);

    /// Pack the four fields. `type_id` is truncated to 15 bits.
    #[inline]
    pub const fn new(index: u32, generation: u16, type_id: u16, free: bool) -> Self {
        Handle(
            index as u64
                | (generation as u64) << GENERATION_SHIFT
                | ((type_id & TYPE_ID_MAX) as u64) << TYPE_ID_SHIFT
                | (free as u64) << FREE_SHIFT,
        )
    }

    /// An outer id, as handed out by [`HandleMap::insert`].
    #[inline]
    pub const fn outer(index: u32, generation: u16, type_id: u16) -> Self {
        Self::new(index, generation, type_id, false)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16
    }

    #[inline]
    pub const fn type_id(self) -> u16 {
        ((self.0 >> TYPE_ID_SHIFT) as u16) & TYPE_ID_MAX
    }

    /// Only meaningful for inner ids read out of the sparse table.
    #[inline]
    pub const fn is_free(self) -> bool {
        (self.0 >> FREE_SHIFT) & 1 == 1
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn get<'a, T>(&self, map: &'a HandleMap<T>) -> Option<&'a T> {
        map.get(*self)
    }

    pub fn get_mut<'a, T>(&self, map: &'a mut HandleMap<T>) -> Option<&'a mut T> {
        map.get_mut(*self)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index())
            .field("generation", &self.generation())
            .field("type_id", &self.type_id())
            .field("free", &self.is_free())
            .finish()
    }
}

impl From<Handle> for u64 {
    fn from(h: Handle) -> u64 {
        h.0
    }
}
