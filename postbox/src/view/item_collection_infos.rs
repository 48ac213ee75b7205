//! The concrete `ItemCollectionInfosView` specimen: a materialized
//! projection over a fixed set of namespaces, each mapped to
//! its ordered collection infos paired with the lowest-keyed item in each
//! collection.

use std::collections::{BTreeMap, HashSet};
use crate::error::Result;
use crate::ids::{ItemCollectionId, ItemCollectionItemKey, Namespace};
use crate::operation::OperationLog;
use crate::table::item_collection::ItemCollectionTable;
use crate::value_box::ValueBox;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemCollectionEntry {
    pub collection_id: i64,
    pub info: Vec<u8>,
    pub first_item: Option<(ItemCollectionItemKey, Vec<u8>)>,
}

pub type ItemCollectionSnapshot = BTreeMap<Namespace, Vec<ItemCollectionEntry>>;

pub struct ItemCollectionInfosView {
    namespaces: Vec<Namespace>,
    snapshot: ItemCollectionSnapshot,
}

impl ItemCollectionInfosView {
    /// Builds the initial snapshot by reading directly from the table
    /// (runs inside the subscribing transaction so the read
    /// is consistent).
    pub fn new<E: ValueBox>(
        namespaces: Vec<Namespace>,
        table: &mut ItemCollectionTable,
        value_box: &mut E,
    ) -> Result<Self> {
        let mut view = Self { namespaces, snapshot: BTreeMap::new() };
        view.reload_namespaces(table, value_box, &view.namespaces.clone())?;
        Ok(view)
    }

    pub fn snapshot(&self) -> &ItemCollectionSnapshot {
        &self.snapshot
    }

    fn reload_namespaces<E: ValueBox>(
        &mut self,
        table: &mut ItemCollectionTable,
        value_box: &mut E,
        namespaces: &[Namespace],
    ) -> Result<()> {
        for &namespace in namespaces {
            if !self.namespaces.contains(&namespace) {
                continue;
            }
            let infos = table.get_infos(value_box, namespace)?;
            let mut entries = Vec::with_capacity(infos.len());
            for (collection_id, info) in infos {
                let first_item =
                    table.get_first_item(value_box, ItemCollectionId { namespace, id: collection_id })?;
                entries.push(ItemCollectionEntry { collection_id, info, first_item });
            }
            self.snapshot.insert(namespace, entries);
        }
        Ok(())
    }

    /// Two-tier replay: a full reload if any namespace's info set
    /// changed, otherwise an in-place, per-entry item refresh for just the
    /// collections named in `ReplaceItems` operations.
    pub fn replay<E: ValueBox>(
        &mut self,
        log: &OperationLog,
        table: &mut ItemCollectionTable,
        value_box: &mut E,
    ) -> Result<bool> {
        if log.item_collection_infos.is_empty() && log.item_collection_items.is_empty() {
            return Ok(false);
        }

        let reload_infos_namespaces: HashSet<Namespace> =
            log.item_collection_infos.iter().map(|op| op.namespace).collect();
        let reload_top_item_collection_ids: HashSet<ItemCollectionId> =
            log.item_collection_items.iter().map(|op| op.collection_id).collect();

        if !reload_infos_namespaces.is_empty() {
            let namespaces: Vec<Namespace> = self.namespaces.clone();
            self.reload_namespaces(table, value_box, &namespaces)?;
            return Ok(true);
        }

        if reload_top_item_collection_ids.is_empty() {
            return Ok(false);
        }

        let mut changed = false;
        let namespaces: Vec<Namespace> = self.snapshot.keys().copied().collect();
        for namespace in namespaces {
            let entries = self.snapshot.get_mut(&namespace).expect("namespace present");
            for entry in entries.iter_mut() {
                let collection_id = ItemCollectionId { namespace, id: entry.collection_id };
                if reload_top_item_collection_ids.contains(&collection_id) {
                    entry.first_item = table.get_first_item(value_box, collection_id)?;
                    changed = true;
                }
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_box::memory::MemoryValueBox;

    fn setup() -> (MemoryValueBox, ItemCollectionTable, OperationLog) {
        (MemoryValueBox::new(), ItemCollectionTable::new(), OperationLog::new())
    }

    #[test]
    fn s3_initial_snapshot_and_replace_infos_replay() {
        let (mut vb, mut table, mut log) = setup();
        let namespace = 9;
        let a = ItemCollectionId { namespace, id: 1 };
        let b = ItemCollectionId { namespace, id: 2 };

        let mut view = ItemCollectionInfosView::new(vec![namespace], &mut table, &mut vb).unwrap();
        assert!(view.snapshot().get(&namespace).unwrap().is_empty());

        table
            .replace_items(
                &mut vb,
                &mut log,
                a,
                vec![(ItemCollectionItemKey(1), b"i1".to_vec()), (ItemCollectionItemKey(2), b"i2".to_vec())],
            )
            .unwrap();
        table
            .replace_infos(
                &mut vb,
                &mut log,
                namespace,
                vec![(a.id, b"infoA".to_vec()), (b.id, b"infoB".to_vec())],
            )
            .unwrap();

        let changed = view.replay(&log, &mut table, &mut vb).unwrap();
        assert!(changed);

        let entries = view.snapshot().get(&namespace).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].collection_id, a.id);
        assert_eq!(entries[0].first_item, Some((ItemCollectionItemKey(1), b"i1".to_vec())));
        assert_eq!(entries[1].collection_id, b.id);
        assert_eq!(entries[1].first_item, None);
    }

    #[test]
    fn s4_item_only_replay_updates_only_the_touched_entry_in_place() {
        let (mut vb, mut table, mut log) = setup();
        let namespace = 9;
        let a = ItemCollectionId { namespace, id: 1 };
        let b = ItemCollectionId { namespace, id: 2 };

        table
            .replace_items(&mut vb, &mut log, a, vec![(ItemCollectionItemKey(1), b"i1".to_vec())])
            .unwrap();
        table
            .replace_infos(
                &mut vb,
                &mut log,
                namespace,
                vec![(a.id, b"infoA".to_vec()), (b.id, b"infoB".to_vec())],
            )
            .unwrap();

        let mut view = ItemCollectionInfosView::new(vec![namespace], &mut table, &mut vb).unwrap();
        view.replay(&log, &mut table, &mut vb).unwrap();
        log.clear();

        table
            .replace_items(
                &mut vb,
                &mut log,
                a,
                vec![
                    (ItemCollectionItemKey(0), b"i0".to_vec()),
                    (ItemCollectionItemKey(1), b"i1".to_vec()),
                ],
            )
            .unwrap();

        let changed = view.replay(&log, &mut table, &mut vb).unwrap();
        assert!(changed);

        let entries = view.snapshot().get(&namespace).unwrap();
        assert_eq!(entries[0].first_item, Some((ItemCollectionItemKey(0), b"i0".to_vec())));
        assert_eq!(entries[1].collection_id, b.id);
        assert_eq!(entries[1].first_item, None);
    }

    #[test]
    fn s5_no_op_transaction_never_reports_a_change() {
        let (mut vb, mut table, log) = setup();
        let mut view = ItemCollectionInfosView::new(vec![0], &mut table, &mut vb).unwrap();
        assert!(!view.replay(&log, &mut table, &mut vb).unwrap());
    }
}
