//! The item-collection table: backs the `ItemCollectionInfosView`
//! specimen. Holds, per namespace, an ordered set of collection infos, and
//! per collection, an ordered set of items. `replace_infos`/`replace_items`
//! are whole-set replacements (matching how the upstream domain layer
//! resyncs a namespace or a single collection in one shot), each emitting
//! exactly one operation regardless of how many rows changed underneath.

use crate::error::Result;
use crate::ids::{ItemCollectionId, ItemCollectionItemKey, Namespace};
use crate::operation::{OperationLog, ReplaceInfosOperation, ReplaceItemsOperation};
use crate::table::Table;
use crate::value_box::ValueBox;

/// Table discriminator: the underlying `ValueBox` is one flat keyspace
/// shared by every table, so this table's keys all start with a byte unique
/// to it before the info/item sub-prefix.
const TABLE_PREFIX: u8 = b'I';
const PREFIX_INFO: u8 = 0;
const PREFIX_ITEM: u8 = 1;

fn key_info(namespace: Namespace, collection_id: i64) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX, PREFIX_INFO];
    key.extend_from_slice(&namespace.to_be_bytes());
    key.extend_from_slice(&collection_id.to_be_bytes());
    key
}

fn info_prefix(namespace: Namespace) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX, PREFIX_INFO];
    key.extend_from_slice(&namespace.to_be_bytes());
    key
}

fn key_item(collection_id: ItemCollectionId, item_key: ItemCollectionItemKey) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX, PREFIX_ITEM];
    key.extend_from_slice(&collection_id.encode());
    key.extend_from_slice(&item_key.encode());
    key
}

fn item_prefix(collection_id: ItemCollectionId) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX, PREFIX_ITEM];
    key.extend_from_slice(&collection_id.encode());
    key
}

#[derive(Default)]
pub struct ItemCollectionTable;

impl ItemCollectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infos for `namespace`, in ascending collection-id order.
    pub fn get_infos<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        namespace: Namespace,
    ) -> Result<Vec<(i64, Vec<u8>)>> {
        let prefix_len = info_prefix(namespace).len();
        let mut out = Vec::new();
        for item in value_box.scan_prefix(&info_prefix(namespace)) {
            let (key, value) = item?;
            let id_bytes: [u8; 8] = key[prefix_len..].try_into().map_err(|_| {
                crate::error::Error::Encoding("malformed item-collection info key".into())
            })?;
            out.push((i64::from_be_bytes(id_bytes), value));
        }
        Ok(out)
    }

    /// The lowest-keyed item in `collection_id`, if any.
    pub fn get_first_item<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        collection_id: ItemCollectionId,
    ) -> Result<Option<(ItemCollectionItemKey, Vec<u8>)>> {
        let prefix = item_prefix(collection_id);
        let prefix_len = prefix.len();
        match value_box.scan_prefix(&prefix).next() {
            Some(item) => {
                let (key, value) = item?;
                let item_key_bytes: [u8; 8] = key[prefix_len..].try_into().map_err(|_| {
                    crate::error::Error::Encoding("malformed item-collection item key".into())
                })?;
                Ok(Some((ItemCollectionItemKey(i64::from_be_bytes(item_key_bytes)), value)))
            }
            None => Ok(None),
        }
    }

    /// Replaces the entire set of infos for `namespace` with `infos`,
    /// emitting a single `ReplaceInfosOperation` regardless of the diff size.
    pub fn replace_infos<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        log: &mut OperationLog,
        namespace: Namespace,
        infos: Vec<(i64, Vec<u8>)>,
    ) -> Result<()> {
        let existing_keys: Vec<Vec<u8>> = value_box
            .scan_prefix(&info_prefix(namespace))
            .map(|item| item.map(|(key, _)| key))
            .collect::<Result<Vec<_>>>()?;
        for key in existing_keys {
            value_box.remove(&key)?;
        }
        for (collection_id, info) in infos {
            value_box.set(&key_info(namespace, collection_id), info)?;
        }
        log.item_collection_infos.push(ReplaceInfosOperation { namespace });
        Ok(())
    }

    /// Replaces the entire item set of `collection_id` with `items`,
    /// emitting a single `ReplaceItemsOperation`.
    pub fn replace_items<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        log: &mut OperationLog,
        collection_id: ItemCollectionId,
        items: Vec<(ItemCollectionItemKey, Vec<u8>)>,
    ) -> Result<()> {
        let existing_keys: Vec<Vec<u8>> = value_box
            .scan_prefix(&item_prefix(collection_id))
            .map(|item| item.map(|(key, _)| key))
            .collect::<Result<Vec<_>>>()?;
        for key in existing_keys {
            value_box.remove(&key)?;
        }
        for (item_key, item) in items {
            value_box.set(&key_item(collection_id, item_key), item)?;
        }
        log.item_collection_items.push(ReplaceItemsOperation { collection_id });
        Ok(())
    }
}

impl<E: ValueBox> Table<E> for ItemCollectionTable {
    fn before_commit(&mut self, _value_box: &mut E) -> Result<()> {
        // Infos and items are written directly to the value box by
        // `replace_infos`/`replace_items`; nothing buffered to flush.
        Ok(())
    }

    fn clear_memory_cache(&mut self) -> Result<()> {
        // This table holds no in-memory cache beyond the value box itself.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_box::memory::MemoryValueBox;

    #[test]
    fn replace_infos_is_ordered_by_collection_id() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = ItemCollectionTable::new();

        table
            .replace_infos(&mut vb, &mut log, 0, vec![(5, b"b".to_vec()), (1, b"a".to_vec())])
            .unwrap();

        assert_eq!(
            table.get_infos(&mut vb, 0).unwrap(),
            vec![(1, b"a".to_vec()), (5, b"b".to_vec())]
        );
        assert_eq!(log.item_collection_infos, vec![ReplaceInfosOperation { namespace: 0 }]);
    }

    #[test]
    fn replace_infos_drops_rows_not_in_the_new_set() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = ItemCollectionTable::new();

        table.replace_infos(&mut vb, &mut log, 0, vec![(1, b"a".to_vec()), (2, b"b".to_vec())]).unwrap();
        table.replace_infos(&mut vb, &mut log, 0, vec![(2, b"b2".to_vec())]).unwrap();

        assert_eq!(table.get_infos(&mut vb, 0).unwrap(), vec![(2, b"b2".to_vec())]);
    }

    #[test]
    fn first_item_is_the_lowest_keyed_item() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = ItemCollectionTable::new();
        let collection = ItemCollectionId { namespace: 0, id: 1 };

        table
            .replace_items(
                &mut vb,
                &mut log,
                collection,
                vec![(ItemCollectionItemKey(5), b"i5".to_vec()), (ItemCollectionItemKey(1), b"i1".to_vec())],
            )
            .unwrap();

        assert_eq!(
            table.get_first_item(&mut vb, collection).unwrap(),
            Some((ItemCollectionItemKey(1), b"i1".to_vec()))
        );
        assert_eq!(
            log.item_collection_items,
            vec![ReplaceItemsOperation { collection_id: collection }]
        );
    }

    #[test]
    fn first_item_is_none_for_an_empty_collection() {
        let mut vb = MemoryValueBox::new();
        let mut table = ItemCollectionTable::new();
        let collection = ItemCollectionId { namespace: 0, id: 1 };
        assert_eq!(table.get_first_item(&mut vb, collection).unwrap(), None);
    }

    #[test]
    fn s3_replace_infos_snapshot_matches_per_collection_first_items() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = ItemCollectionTable::new();
        let namespace = 9;
        let a = ItemCollectionId { namespace, id: 1 };
        let b = ItemCollectionId { namespace, id: 2 };

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

        let infos = table.get_infos(&mut vb, namespace).unwrap();
        assert_eq!(infos, vec![(a.id, b"infoA".to_vec()), (b.id, b"infoB".to_vec())]);
        assert_eq!(
            table.get_first_item(&mut vb, a).unwrap(),
            Some((ItemCollectionItemKey(1), b"i1".to_vec()))
        );
        assert_eq!(table.get_first_item(&mut vb, b).unwrap(), None);
    }
}
