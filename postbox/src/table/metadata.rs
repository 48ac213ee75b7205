//! The history metadata table: a grab-bag of singleton scalars,
//! initialization flags, and per-peer monotonic counters, all sharing one
//! underlying `ValueBox` table and distinguished by a single prefix byte.

use std::collections::{HashMap, HashSet};
use crate::codec::ChatListTotalUnreadState;
use crate::error::{Error, Result};
use crate::ids::{decode_be_u32, encode_be_i32, encode_be_i64, encode_be_u32, GroupId, Namespace, PeerId};
use crate::table::Table;
use crate::value_box::ValueBox;

/// Table discriminator: the underlying `ValueBox` is one flat keyspace
/// shared by every table, so each table's keys start with a byte unique to
/// that table before its own internal category layout.
const TABLE_PREFIX: u8 = b'M';

const PREFIX_CHAT_LIST_INITIALIZED: u8 = 0;
const PREFIX_PEER_HISTORY_INITIALIZED: u8 = 1;
const PREFIX_PEER_NEXT_MESSAGE_ID: u8 = 2;
const PREFIX_NEXT_STABLE_MESSAGE_ID: u8 = 3;
const PREFIX_CHAT_LIST_TOTAL_UNREAD_STATE: u8 = 4;
const PREFIX_NEXT_PEER_OPERATION_LOG_INDEX: u8 = 5;
const PREFIX_CHAT_LIST_GROUP_INITIALIZED: u8 = 6;
const PREFIX_GROUP_FEED_INDEX_INITIALIZED: u8 = 7;

fn key_chat_list_initialized() -> Vec<u8> {
    vec![TABLE_PREFIX, PREFIX_CHAT_LIST_INITIALIZED]
}

fn key_peer_history_initialized(peer_id: PeerId) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX];
    key.extend_from_slice(&encode_be_i64(peer_id));
    key.push(PREFIX_PEER_HISTORY_INITIALIZED);
    key
}

fn key_peer_next_message_id(peer_id: PeerId, namespace: Namespace) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX];
    key.extend_from_slice(&encode_be_i64(peer_id));
    key.push(PREFIX_PEER_NEXT_MESSAGE_ID);
    key.extend_from_slice(&encode_be_i32(namespace));
    key
}

fn key_next_stable_message_id() -> Vec<u8> {
    vec![TABLE_PREFIX, PREFIX_NEXT_STABLE_MESSAGE_ID]
}

fn key_chat_list_total_unread_state() -> Vec<u8> {
    vec![TABLE_PREFIX, PREFIX_CHAT_LIST_TOTAL_UNREAD_STATE]
}

fn key_next_peer_operation_log_index() -> Vec<u8> {
    vec![TABLE_PREFIX, PREFIX_NEXT_PEER_OPERATION_LOG_INDEX]
}

fn key_chat_list_group_initialized(group_id: GroupId) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX];
    key.extend_from_slice(&encode_be_i32(group_id));
    key.push(PREFIX_CHAT_LIST_GROUP_INITIALIZED);
    key
}

fn key_group_feed_index_initialized(group_id: GroupId) -> Vec<u8> {
    let mut key = vec![TABLE_PREFIX];
    key.extend_from_slice(&encode_be_i32(group_id));
    key.push(PREFIX_GROUP_FEED_INDEX_INITIALIZED);
    key
}

#[derive(Default)]
pub struct MetadataTable {
    chat_list_initialized: bool,
    peer_history_initialized: HashSet<PeerId>,
    chat_list_group_initialized: HashSet<GroupId>,
    group_feed_index_initialized: HashSet<GroupId>,

    /// Cached "next value to return" per (peer, namespace) counter.
    peer_next_message_id: HashMap<(PeerId, Namespace), u32>,
    peer_next_message_id_dirty: HashSet<(PeerId, Namespace)>,

    next_stable_message_id: Option<u32>,
    next_stable_message_id_dirty: bool,

    next_peer_operation_log_index: Option<u32>,
    next_peer_operation_log_index_dirty: bool,

    chat_list_total_unread_state: Option<ChatListTotalUnreadState>,
    chat_list_total_unread_state_dirty: bool,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    // -- initialization flags -------------------------------------------------

    pub fn is_chat_list_initialized<E: ValueBox>(&mut self, value_box: &mut E) -> Result<bool> {
        if self.chat_list_initialized {
            return Ok(true);
        }
        if value_box.exists(&key_chat_list_initialized())? {
            self.chat_list_initialized = true;
        }
        Ok(self.chat_list_initialized)
    }

    pub fn set_chat_list_initialized<E: ValueBox>(&mut self, value_box: &mut E) -> Result<()> {
        if self.chat_list_initialized {
            return Ok(());
        }
        value_box.set(&key_chat_list_initialized(), Vec::new())?;
        self.chat_list_initialized = true;
        Ok(())
    }

    pub fn is_peer_history_initialized<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        peer_id: PeerId,
    ) -> Result<bool> {
        if self.peer_history_initialized.contains(&peer_id) {
            return Ok(true);
        }
        if value_box.exists(&key_peer_history_initialized(peer_id))? {
            self.peer_history_initialized.insert(peer_id);
        }
        Ok(self.peer_history_initialized.contains(&peer_id))
    }

    pub fn set_peer_history_initialized<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        peer_id: PeerId,
    ) -> Result<()> {
        if self.peer_history_initialized.contains(&peer_id) {
            return Ok(());
        }
        value_box.set(&key_peer_history_initialized(peer_id), Vec::new())?;
        self.peer_history_initialized.insert(peer_id);
        Ok(())
    }

    pub fn is_chat_list_group_initialized<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        group_id: GroupId,
    ) -> Result<bool> {
        if self.chat_list_group_initialized.contains(&group_id) {
            return Ok(true);
        }
        if value_box.exists(&key_chat_list_group_initialized(group_id))? {
            self.chat_list_group_initialized.insert(group_id);
        }
        Ok(self.chat_list_group_initialized.contains(&group_id))
    }

    pub fn set_chat_list_group_initialized<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        group_id: GroupId,
    ) -> Result<()> {
        if self.chat_list_group_initialized.contains(&group_id) {
            return Ok(());
        }
        value_box.set(&key_chat_list_group_initialized(group_id), Vec::new())?;
        self.chat_list_group_initialized.insert(group_id);
        Ok(())
    }

    pub fn is_group_feed_index_initialized<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        group_id: GroupId,
    ) -> Result<bool> {
        if self.group_feed_index_initialized.contains(&group_id) {
            return Ok(true);
        }
        if value_box.exists(&key_group_feed_index_initialized(group_id))? {
            self.group_feed_index_initialized.insert(group_id);
        }
        Ok(self.group_feed_index_initialized.contains(&group_id))
    }

    pub fn set_group_feed_index_initialized<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        group_id: GroupId,
    ) -> Result<()> {
        if self.group_feed_index_initialized.contains(&group_id) {
            return Ok(());
        }
        value_box.set(&key_group_feed_index_initialized(group_id), Vec::new())?;
        self.group_feed_index_initialized.insert(group_id);
        Ok(())
    }

    // -- counters --------------------------------------------------------------

    /// Returns the next id for `(peer_id, namespace)` and advances the
    /// counter by one. IDs start at 1 and are strictly monotonic for the
    /// lifetime of the underlying store, across restarts, provided every
    /// acquired id belongs to a committed transaction.
    pub fn get_next_message_id_and_increment<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        peer_id: PeerId,
        namespace: Namespace,
    ) -> Result<u32> {
        let key = (peer_id, namespace);
        if !self.peer_next_message_id.contains_key(&key) {
            let loaded = match value_box.get(&key_peer_next_message_id(peer_id, namespace))? {
                Some(bytes) => decode_be_u32(&bytes)?,
                None => 1,
            };
            self.peer_next_message_id.insert(key, loaded);
        }
        let next = *self.peer_next_message_id.get(&key).unwrap();
        self.peer_next_message_id.insert(key, next + 1);
        self.peer_next_message_id_dirty.insert(key);
        Ok(next)
    }

    pub fn get_next_stable_message_index_id<E: ValueBox>(&mut self, value_box: &mut E) -> Result<u32> {
        if self.next_stable_message_id.is_none() {
            let loaded = match value_box.get(&key_next_stable_message_id())? {
                Some(bytes) => decode_be_u32(&bytes)?,
                None => 1,
            };
            self.next_stable_message_id = Some(loaded);
        }
        let next = self.next_stable_message_id.unwrap();
        self.next_stable_message_id = Some(next + 1);
        self.next_stable_message_id_dirty = true;
        Ok(next)
    }

    pub fn get_next_peer_operation_log_index<E: ValueBox>(&mut self, value_box: &mut E) -> Result<u32> {
        if self.next_peer_operation_log_index.is_none() {
            let loaded = match value_box.get(&key_next_peer_operation_log_index())? {
                Some(bytes) => decode_be_u32(&bytes)?,
                None => 1,
            };
            self.next_peer_operation_log_index = Some(loaded);
        }
        let next = self.next_peer_operation_log_index.unwrap();
        self.next_peer_operation_log_index = Some(next + 1);
        self.next_peer_operation_log_index_dirty = true;
        Ok(next)
    }

    // -- unread state ------------------------------------------------------

    pub fn get_chat_list_total_unread_state<E: ValueBox>(
        &mut self,
        value_box: &mut E,
    ) -> Result<ChatListTotalUnreadState> {
        if self.chat_list_total_unread_state.is_none() {
            let loaded = match value_box.get(&key_chat_list_total_unread_state())? {
                Some(bytes) => ChatListTotalUnreadState::decode(&bytes)?,
                None => ChatListTotalUnreadState::default(),
            };
            self.chat_list_total_unread_state = Some(loaded);
        }
        Ok(self.chat_list_total_unread_state.clone().unwrap())
    }

    pub fn set_chat_list_total_unread_state<E: ValueBox>(
        &mut self,
        value_box: &mut E,
        state: ChatListTotalUnreadState,
    ) -> Result<()> {
        let current = self.get_chat_list_total_unread_state(value_box)?;
        if current == state {
            return Ok(());
        }
        self.chat_list_total_unread_state = Some(state);
        self.chat_list_total_unread_state_dirty = true;
        Ok(())
    }
}

impl<E: ValueBox> Table<E> for MetadataTable {
    fn before_commit(&mut self, value_box: &mut E) -> Result<()> {
        for key @ &(peer_id, namespace) in self.peer_next_message_id_dirty.iter() {
            match self.peer_next_message_id.get(key) {
                Some(value) => {
                    value_box.set(
                        &key_peer_next_message_id(peer_id, namespace),
                        encode_be_u32(*value).to_vec(),
                    )?;
                }
                None => {
                    value_box.remove(&key_peer_next_message_id(peer_id, namespace))?;
                }
            }
        }
        self.peer_next_message_id_dirty.clear();

        if self.next_stable_message_id_dirty {
            if let Some(value) = self.next_stable_message_id {
                value_box.set(&key_next_stable_message_id(), encode_be_u32(value).to_vec())?;
            }
            self.next_stable_message_id_dirty = false;
        }

        if self.next_peer_operation_log_index_dirty {
            if let Some(value) = self.next_peer_operation_log_index {
                value_box
                    .set(&key_next_peer_operation_log_index(), encode_be_u32(value).to_vec())?;
            }
            self.next_peer_operation_log_index_dirty = false;
        }

        if self.chat_list_total_unread_state_dirty {
            if let Some(state) = &self.chat_list_total_unread_state {
                value_box.set(&key_chat_list_total_unread_state(), state.encode()?)?;
            }
            self.chat_list_total_unread_state_dirty = false;
        }

        Ok(())
    }

    fn clear_memory_cache(&mut self) -> Result<()> {
        if !self.peer_next_message_id_dirty.is_empty()
            || self.next_stable_message_id_dirty
            || self.next_peer_operation_log_index_dirty
            || self.chat_list_total_unread_state_dirty
        {
            return Err(Error::logic(
                "clear_memory_cache called on MetadataTable with unflushed dirty state",
            ));
        }
        *self = Self::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_box::memory::MemoryValueBox;

    #[test]
    fn flags_are_idempotent_and_observed_without_reloading_once_cached() {
        let mut vb = MemoryValueBox::new();
        let mut table = MetadataTable::new();

        assert!(!table.is_chat_list_initialized(&mut vb).unwrap());
        table.set_chat_list_initialized(&mut vb).unwrap();
        assert!(table.is_chat_list_initialized(&mut vb).unwrap());
        // idempotent: a second set does not error or double-write.
        table.set_chat_list_initialized(&mut vb).unwrap();
    }

    #[test]
    fn counters_start_at_one_and_increment_monotonically() {
        let mut vb = MemoryValueBox::new();
        let mut table = MetadataTable::new();

        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 7, 0).unwrap(), 1);
        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 7, 0).unwrap(), 2);
        // a different namespace/peer gets its own counter.
        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 7, 1).unwrap(), 1);
        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 8, 0).unwrap(), 1);
    }

    #[test]
    fn s1_fresh_counter_persists_cached_next_value_on_commit() {
        let mut vb = MemoryValueBox::new();
        let mut table = MetadataTable::new();

        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 7, 0).unwrap(), 1);
        Table::before_commit(&mut table, &mut vb).unwrap();

        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 7, 0).unwrap(), 2);
        Table::before_commit(&mut table, &mut vb).unwrap();

        let persisted = vb.get(&key_peer_next_message_id(7, 0)).unwrap().unwrap();
        assert_eq!(decode_be_u32(&persisted).unwrap(), 3);
    }

    #[test]
    fn counter_survives_reload_after_clearing_memory_cache() {
        let mut vb = MemoryValueBox::new();
        let mut table = MetadataTable::new();

        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 7, 0).unwrap(), 1);
        Table::before_commit(&mut table, &mut vb).unwrap();
        Table::<MemoryValueBox>::clear_memory_cache(&mut table).unwrap();

        assert_eq!(table.get_next_message_id_and_increment(&mut vb, 7, 0).unwrap(), 2);
    }

    #[test]
    fn clear_memory_cache_rejects_unflushed_dirty_state() {
        let mut vb = MemoryValueBox::new();
        let mut table = MetadataTable::new();
        table.get_next_message_id_and_increment(&mut vb, 7, 0).unwrap();
        assert!(Table::<MemoryValueBox>::clear_memory_cache(&mut table).is_err());
    }

    #[test]
    fn unread_state_set_is_a_no_op_when_equal_to_current() {
        let mut vb = MemoryValueBox::new();
        let mut table = MetadataTable::new();

        let mut state = ChatListTotalUnreadState::default();
        state.absolute_counters.insert(
            crate::codec::PeerSummaryCounterTag(1),
            crate::codec::PeerSummaryCounters { message_count: 5, chat_count: 2 },
        );

        table.set_chat_list_total_unread_state(&mut vb, state.clone()).unwrap();
        assert!(table.chat_list_total_unread_state_dirty);
        Table::before_commit(&mut table, &mut vb).unwrap();

        table.set_chat_list_total_unread_state(&mut vb, state).unwrap();
        assert!(!table.chat_list_total_unread_state_dirty);
    }

    #[test]
    fn s2_unread_state_round_trips_across_a_reopen() {
        let mut vb = MemoryValueBox::new();
        let mut table = MetadataTable::new();

        let mut state = ChatListTotalUnreadState::default();
        state.absolute_counters.insert(
            crate::codec::PeerSummaryCounterTag(1),
            crate::codec::PeerSummaryCounters { message_count: 5, chat_count: 2 },
        );
        table.set_chat_list_total_unread_state(&mut vb, state.clone()).unwrap();
        Table::before_commit(&mut table, &mut vb).unwrap();

        let mut reopened = MetadataTable::new();
        assert_eq!(reopened.get_chat_list_total_unread_state(&mut vb).unwrap(), state);
    }
}
