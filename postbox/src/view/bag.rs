//! An insertion-ordered collection with O(1) removal by a stable opaque
//! handle. Backs the subscription registry: views may unsubscribe
//! from inside `replay` notification without disturbing the handles of
//! other, still-live subscribers.

use slab::Slab;

/// An opaque handle into a `Bag`. Stable across insertions and removals of
/// other entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BagHandle(usize);

pub struct Bag<T> {
    slab: Slab<T>,
}

impl<T> Default for Bag<T> {
    fn default() -> Self {
        Self { slab: Slab::new() }
    }
}

impl<T> Bag<T> {
    pub fn new() -> Self {
        Self { slab: Slab::new() }
    }

    pub fn insert(&mut self, value: T) -> BagHandle {
        BagHandle(self.slab.insert(value))
    }

    /// Removes the entry for `handle`, if still present. Returns the removed
    /// value, or `None` if it was already removed (double-dispose is not an
    /// error).
    pub fn remove(&mut self, handle: BagHandle) -> Option<T> {
        self.slab.try_remove(handle.0)
    }

    pub fn get_mut(&mut self, handle: BagHandle) -> Option<&mut T> {
        self.slab.get_mut(handle.0)
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    /// A snapshot copy of the live handles, taken before iterating so
    /// entries may remove themselves (or others may be removed) mid-replay
    /// without invalidating the remaining iteration.
    pub fn handles(&self) -> Vec<BagHandle> {
        self.slab.iter().map(|(index, _)| BagHandle(index)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_remove_round_trips() {
        let mut bag = Bag::new();
        let h = bag.insert("a");
        assert_eq!(bag.get_mut(h), Some(&mut "a"));
        assert_eq!(bag.remove(h), Some("a"));
        assert_eq!(bag.get_mut(h), None);
    }

    #[test]
    fn removing_twice_is_not_an_error() {
        let mut bag: Bag<&str> = Bag::new();
        let h = bag.insert("a");
        bag.remove(h);
        assert_eq!(bag.remove(h), None);
    }

    #[test]
    fn bag_stability_removing_entries_in_arbitrary_order_preserves_other_handles() {
        let mut bag = Bag::new();
        let handles: Vec<_> = (0..10).map(|i| bag.insert(i)).collect();

        // remove every third handle, in a scrambled order.
        for &i in &[7, 1, 4] {
            bag.remove(handles[i]);
        }

        for (i, &h) in handles.iter().enumerate() {
            if [7, 1, 4].contains(&i) {
                assert_eq!(bag.get_mut(h), None);
            } else {
                assert_eq!(bag.get_mut(h), Some(&mut (i as i32)));
            }
        }
    }

    #[test]
    fn handles_snapshot_is_unaffected_by_concurrent_mutation_during_iteration() {
        let mut bag = Bag::new();
        let a = bag.insert("a");
        let _b = bag.insert("b");
        let snapshot = bag.handles();

        bag.remove(a);
        bag.insert("c");

        // the snapshot still names the original two handles.
        assert_eq!(snapshot.len(), 2);
    }
}
