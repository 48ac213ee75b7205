//! Encoding helpers for values stored in the metadata table and friends.
//!
//! The encoding framework itself is an out-of-scope external collaborator;
//! this module picks one concrete, documented encoding (`bincode` over
//! `serde`-derived structs) and uses it consistently for every value that
//! isn't a bare counter or a flag.

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use crate::error::Result;

pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: for<'a> serde::Deserialize<'a>>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// A tag identifying one partition of unread-message accounting (e.g. "muted
/// group chats", "regular one-to-one chats"). Left abstract here: the core
/// only needs it to be a totally-ordered, encodable key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerSummaryCounterTag(pub i32);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummaryCounters {
    #[serde(rename = "m")]
    pub message_count: i32,
    #[serde(rename = "c")]
    pub chat_count: i32,
}

/// `ChatListTotalUnreadState`, encoded so that `"ad"`/`"fd"` for the two
/// top-level maps, `"k"`/`"m"`/`"c"` for each entry's tag/message-count/
/// chat-count.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatListTotalUnreadState {
    #[serde(rename = "ad")]
    pub absolute_counters: BTreeMap<PeerSummaryCounterTag, PeerSummaryCounters>,
    #[serde(rename = "fd")]
    pub filtered_counters: BTreeMap<PeerSummaryCounterTag, PeerSummaryCounters>,
}

// bincode can't derive Serialize for a BTreeMap keyed by a struct unless the
// struct itself round-trips through a scalar; represent the map on the wire
// as a sequence of (tag, counters) pairs instead, matching the encoded
// "k"/"m"/"c" field layout.
#[derive(Serialize, Deserialize)]
struct WireEntry {
    k: i32,
    m: i32,
    c: i32,
}

#[derive(Default, Serialize, Deserialize)]
struct WireUnreadState {
    ad: Vec<WireEntry>,
    fd: Vec<WireEntry>,
}

fn to_wire(map: &BTreeMap<PeerSummaryCounterTag, PeerSummaryCounters>) -> Vec<WireEntry> {
    map.iter()
        .map(|(tag, counters)| WireEntry {
            k: tag.0,
            m: counters.message_count,
            c: counters.chat_count,
        })
        .collect()
}

fn from_wire(entries: Vec<WireEntry>) -> BTreeMap<PeerSummaryCounterTag, PeerSummaryCounters> {
    entries
        .into_iter()
        .map(|e| {
            (
                PeerSummaryCounterTag(e.k),
                PeerSummaryCounters { message_count: e.m, chat_count: e.c },
            )
        })
        .collect()
}

impl ChatListTotalUnreadState {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let wire = WireUnreadState {
            ad: to_wire(&self.absolute_counters),
            fd: to_wire(&self.filtered_counters),
        };
        encode(&wire)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let wire: WireUnreadState = decode(bytes)?;
        Ok(Self { absolute_counters: from_wire(wire.ad), filtered_counters: from_wire(wire.fd) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unread_state_round_trips_through_encoding() {
        let mut state = ChatListTotalUnreadState::default();
        state.absolute_counters.insert(
            PeerSummaryCounterTag(1),
            PeerSummaryCounters { message_count: 5, chat_count: 2 },
        );
        let bytes = state.encode().unwrap();
        let decoded = ChatListTotalUnreadState::decode(&bytes).unwrap();
        assert_eq!(state, decoded);
    }
}
