//! The account record table: opaque, encoded blobs keyed by
//! `AccountRecordId`, scanned in key order by `get_records`. Every write is
//! recorded as a `RecordOperation` so views (and callers) can diff the
//! before/after state without re-scanning.

use std::collections::BTreeMap;
use crate::error::Result;
use crate::ids::AccountRecordId;
use crate::operation::{OperationLog, RecordOperation};
use crate::table::Table;
use crate::value_box::ValueBox;

/// Table discriminator: the underlying `ValueBox` is one flat keyspace
/// shared by every table, so record keys are prefixed with a byte unique to
/// this table before the raw `AccountRecordId` encoding.
const TABLE_PREFIX: u8 = b'R';

fn encode_key(id: AccountRecordId) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX];
    key.extend_from_slice(&id.encode());
    key
}

#[derive(Default)]
pub struct RecordTable {
    cache: BTreeMap<AccountRecordId, Vec<u8>>,
    loaded: bool,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn load<E: ValueBox>(&mut self, value_box: &mut E) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        for item in value_box.scan_prefix(&[TABLE_PREFIX]) {
            let (key, value) = item?;
            self.cache.insert(AccountRecordId::decode(&key[1..])?, value);
        }
        self.loaded = true;
        Ok(())
    }

    pub fn get<E: ValueBox>(&mut self, value_box: &mut E, id: AccountRecordId) -> Result<Option<Vec<u8>>> {
        self.load(value_box)?;
        Ok(self.cache.get(&id).cloned())
    }

    /// All records, in ascending id order.
    pub fn get_records<E: ValueBox>(&mut self, value_box: &mut E) -> Result<Vec<(AccountRecordId, Vec<u8>)>> {
        self.load(value_box)?;
        Ok(self.cache.iter().map(|(id, value)| (*id, value.clone())).collect())
    }

    pub fn set<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        log: &mut OperationLog,
        id: AccountRecordId,
        value: Vec<u8>,
    ) -> Result<()> {
        self.load(value_box)?;
        let before = self.cache.insert(id, value.clone());
        if before.as_ref() == Some(&value) {
            return Ok(());
        }
        value_box.set(&encode_key(id), value.clone())?;
        log.records.push(RecordOperation { id, before, after: Some(value) });
        Ok(())
    }

    pub fn remove<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        log: &mut OperationLog,
        id: AccountRecordId,
    ) -> Result<()> {
        self.load(value_box)?;
        let before = self.cache.remove(&id);
        if before.is_none() {
            return Ok(());
        }
        value_box.remove(&encode_key(id))?;
        log.records.push(RecordOperation { id, before, after: None });
        Ok(())
    }
}

impl AccountRecordId {
    fn decode(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| crate::error::Error::Encoding("expected 8-byte AccountRecordId".into()))?;
        Ok(AccountRecordId(i64::from_be_bytes(arr)))
    }
}

impl<E: ValueBox> Table<E> for RecordTable {
    fn before_commit(&mut self, _value_box: &mut E) -> Result<()> {
        // Record writes are applied to the value box immediately in `set`/
        // `remove`; nothing buffered to flush here.
        Ok(())
    }

    fn clear_memory_cache(&mut self) -> Result<()> {
        self.cache.clear();
        self.loaded = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_box::memory::MemoryValueBox;

    #[test]
    fn set_then_get_round_trips() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = RecordTable::new();

        table.set(&mut vb, &mut log, AccountRecordId(1), b"hello".to_vec()).unwrap();
        assert_eq!(table.get(&mut vb, AccountRecordId(1)).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(log.records.len(), 1);
        assert_eq!(log.records[0].before, None);
        assert_eq!(log.records[0].after, Some(b"hello".to_vec()));
    }

    #[test]
    fn identical_set_is_silently_idempotent() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = RecordTable::new();

        table.set(&mut vb, &mut log, AccountRecordId(1), b"hello".to_vec()).unwrap();
        table.set(&mut vb, &mut log, AccountRecordId(1), b"hello".to_vec()).unwrap();
        assert_eq!(log.records.len(), 1);
    }

    #[test]
    fn get_records_is_sorted_by_id() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = RecordTable::new();

        table.set(&mut vb, &mut log, AccountRecordId(5), b"b".to_vec()).unwrap();
        table.set(&mut vb, &mut log, AccountRecordId(1), b"a".to_vec()).unwrap();

        let records = table.get_records(&mut vb).unwrap();
        assert_eq!(records, vec![(AccountRecordId(1), b"a".to_vec()), (AccountRecordId(5), b"b".to_vec())]);
    }

    #[test]
    fn remove_logs_the_deletion() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = RecordTable::new();

        table.set(&mut vb, &mut log, AccountRecordId(1), b"a".to_vec()).unwrap();
        log.clear();
        table.remove(&mut vb, &mut log, AccountRecordId(1)).unwrap();

        assert_eq!(table.get(&mut vb, AccountRecordId(1)).unwrap(), None);
        assert_eq!(log.records[0].before, Some(b"a".to_vec()));
        assert_eq!(log.records[0].after, None);
    }

    #[test]
    fn remove_of_missing_record_is_a_no_op() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = RecordTable::new();

        table.remove(&mut vb, &mut log, AccountRecordId(1)).unwrap();
        assert!(log.records.is_empty());
    }
}
