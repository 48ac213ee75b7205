//! Per-transaction operation logs.
//!
//! Tables append semantic deltas here as they mutate; the transaction
//! driver's `before_commit` pipeline replays the accumulated logs against
//! every registered view, then clears them. Operation logs never cross a
//! commit boundary.

use crate::ids::{AccountRecordId, ItemCollectionId, Namespace};
use std::collections::HashSet;

/// A change to the set of infos for one namespace of item collections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReplaceInfosOperation {
    pub namespace: Namespace,
}

/// A change to the items of one specific item collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReplaceItemsOperation {
    pub collection_id: ItemCollectionId,
}

/// The before/after transition of one account record, used both for insert
/// (`before: None`), update (`before: Some`, `after: Some`), and delete
/// (`after: None`).
#[derive(Clone, Debug, PartialEq)]
pub struct RecordOperation {
    pub id: AccountRecordId,
    pub before: Option<Vec<u8>>,
    pub after: Option<Vec<u8>>,
}

/// Metadata-level operations touching the account-manager core rather than
/// a single record.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataOperation {
    CurrentAccountIdChanged(Option<AccountRecordId>),
}

/// The complete operation log accumulated by one in-flight transaction,
/// across every operation kind the core defines. Cleared by
/// `OperationLog::clear` at the end of every commit.
#[derive(Default)]
pub struct OperationLog {
    pub item_collection_infos: Vec<ReplaceInfosOperation>,
    pub item_collection_items: Vec<ReplaceItemsOperation>,
    pub records: Vec<RecordOperation>,
    pub metadata: Vec<MetadataOperation>,
    pub updated_shared_data_keys: HashSet<Vec<u8>>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.item_collection_infos.is_empty()
            && self.item_collection_items.is_empty()
            && self.records.is_empty()
            && self.metadata.is_empty()
            && self.updated_shared_data_keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.item_collection_infos.clear();
        self.item_collection_items.clear();
        self.records.clear();
        self.metadata.clear();
        self.updated_shared_data_keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_empties_every_kind_of_log() {
        let mut log = OperationLog::new();
        log.item_collection_infos.push(ReplaceInfosOperation { namespace: 0 });
        log.item_collection_items
            .push(ReplaceItemsOperation { collection_id: ItemCollectionId { namespace: 0, id: 1 } });
        log.records.push(RecordOperation { id: AccountRecordId(1), before: None, after: Some(vec![1]) });
        log.metadata.push(MetadataOperation::CurrentAccountIdChanged(Some(AccountRecordId(1))));
        log.updated_shared_data_keys.insert(b"k".to_vec());
        assert!(!log.is_empty());

        log.clear();
        assert!(log.is_empty());
    }
}
