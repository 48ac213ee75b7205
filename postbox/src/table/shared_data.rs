//! The shared data table: arbitrary caller-defined keys pointing at
//! arbitrary opaque blobs, used for small pieces of state that don't deserve
//! their own table. Writes are equality-gated: setting a key to the value it
//! already holds touches neither the value box nor the operation log.

use std::collections::BTreeMap;
use crate::error::Result;
use crate::operation::OperationLog;
use crate::table::Table;
use crate::value_box::ValueBox;

/// Table discriminator: the underlying `ValueBox` is one flat keyspace
/// shared by every table, so shared-data keys are prefixed with a byte
/// sequence unique to this table before the caller's own key.
const KEY_PREFIX: &[u8] = b"S:";

fn encode_key(key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(KEY_PREFIX.len() + key.len());
    buf.extend_from_slice(KEY_PREFIX);
    buf.extend_from_slice(key);
    buf
}

#[derive(Default)]
pub struct SharedDataTable {
    cache: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl SharedDataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<E: ValueBox>(&mut self, value_box: &mut E, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value.clone()));
        }
        let loaded = value_box.get(&encode_key(key))?;
        if let Some(value) = &loaded {
            self.cache.insert(key.to_vec(), value.clone());
        }
        Ok(loaded)
    }

    /// Reads several keys in one call, preserving the order of `keys`.
    pub fn get_many<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        keys: &[Vec<u8>],
    ) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        keys.iter().map(|key| Ok((key.clone(), self.get(value_box, key)?))).collect()
    }

    pub fn set<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        log: &mut OperationLog,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<()> {
        if self.get(value_box, &key)?.as_ref() == Some(&value) {
            return Ok(());
        }
        value_box.set(&encode_key(&key), value.clone())?;
        self.cache.insert(key.clone(), value);
        log.updated_shared_data_keys.insert(key);
        Ok(())
    }

    pub fn remove<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        log: &mut OperationLog,
        key: Vec<u8>,
    ) -> Result<()> {
        if self.get(value_box, &key)?.is_none() {
            return Ok(());
        }
        value_box.remove(&encode_key(&key))?;
        self.cache.remove(&key);
        log.updated_shared_data_keys.insert(key);
        Ok(())
    }
}

impl<E: ValueBox> Table<E> for SharedDataTable {
    fn before_commit(&mut self, _value_box: &mut E) -> Result<()> {
        // Every write above is applied to the value box immediately.
        Ok(())
    }

    fn clear_memory_cache(&mut self) -> Result<()> {
        self.cache.clear();
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
        let mut table = SharedDataTable::new();

        table.set(&mut vb, &mut log, b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(table.get(&mut vb, b"k").unwrap(), Some(b"v".to_vec()));
        assert!(log.updated_shared_data_keys.contains(b"k".as_slice()));
    }

    #[test]
    fn identical_set_does_not_mark_the_key_updated() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = SharedDataTable::new();

        table.set(&mut vb, &mut log, b"k".to_vec(), b"v".to_vec()).unwrap();
        log.clear();
        table.set(&mut vb, &mut log, b"k".to_vec(), b"v".to_vec()).unwrap();
        assert!(log.updated_shared_data_keys.is_empty());
    }

    #[test]
    fn get_many_preserves_requested_order() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = SharedDataTable::new();

        table.set(&mut vb, &mut log, b"a".to_vec(), b"1".to_vec()).unwrap();
        table.set(&mut vb, &mut log, b"b".to_vec(), b"2".to_vec()).unwrap();

        let result = table.get_many(&mut vb, &[b"b".to_vec(), b"missing".to_vec(), b"a".to_vec()]).unwrap();
        assert_eq!(
            result,
            vec![
                (b"b".to_vec(), Some(b"2".to_vec())),
                (b"missing".to_vec(), None),
                (b"a".to_vec(), Some(b"1".to_vec())),
            ]
        );
    }

    #[test]
    fn remove_of_missing_key_is_a_no_op() {
        let mut vb = MemoryValueBox::new();
        let mut log = OperationLog::new();
        let mut table = SharedDataTable::new();

        table.remove(&mut vb, &mut log, b"k".to_vec()).unwrap();
        assert!(log.updated_shared_data_keys.is_empty());
    }
}
