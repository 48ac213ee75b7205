//! The table base contract: every persistent table stages writes in
//! memory and only touches the `ValueBox` either immediately for
//! idempotent/unbuffered writes, or at `before_commit` for buffered,
//! "dirty" state.

pub mod metadata;
pub mod records;
pub mod shared_data;
pub mod item_collection;

use crate::error::Result;
use crate::value_box::ValueBox;

/// Every table implements this contract. `E` is the concrete `ValueBox`
/// backing the whole postbox; tables are not generic over trait objects
/// because one postbox only ever has one value box.
pub trait Table<E: ValueBox> {
    /// Flushes all dirty in-memory state to `value_box` and clears dirty
    /// flags. Idempotent if nothing is dirty.
    fn before_commit(&mut self, value_box: &mut E) -> Result<()>;

    /// Discards all read caches and any pending dirty flags. Precondition:
    /// no dirty state outstanding — callers must commit or abort first.
    /// Returns a `Logic` error if called with dirty state present (see
    /// `DESIGN.md`).
    fn clear_memory_cache(&mut self) -> Result<()>;
}
