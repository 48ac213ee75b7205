//! Fixed-width domain identifiers.
//!
//! Every identifier here encodes to a byte buffer whose lexicographic order
//! matches its natural numeric order, because that order is what the
//! underlying `ValueBox` uses to index rows (see `value_box`). All integer
//! fields are encoded big-endian for exactly this reason.

use byteorder::{BigEndian, WriteBytesExt};

/// A peer (chat/conversation partner) identifier.
pub type PeerId = i64;

/// A namespace discriminates message/collection kinds within one peer.
pub type Namespace = i32;

/// A chat-list group identifier.
pub type GroupId = i32;

/// `(peerId, namespace, id)`, totally ordered lexicographically by byte encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId {
    pub peer_id: PeerId,
    pub namespace: Namespace,
    pub id: i32,
}

impl MessageId {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.write_i64::<BigEndian>(self.peer_id).unwrap();
        buf.write_i32::<BigEndian>(self.namespace).unwrap();
        buf.write_i32::<BigEndian>(self.id).unwrap();
        buf
    }
}

/// `(namespace, id)`, totally ordered lexicographically by byte encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemCollectionId {
    pub namespace: Namespace,
    pub id: i64,
}

impl ItemCollectionId {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        buf.write_i32::<BigEndian>(self.namespace).unwrap();
        buf.write_i64::<BigEndian>(self.id).unwrap();
        buf
    }
}

/// An item inside an item collection, identified by a key that sorts items
/// within their collection (lowest key first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemCollectionItemKey(pub i64);

impl ItemCollectionItemKey {
    pub fn encode(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }
}

/// An account record identifier (64-bit, monotonic within a process lifetime
/// once allocated by `Postbox::allocated_temporary_account_id`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct AccountRecordId(pub i64);

impl AccountRecordId {
    pub fn encode(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }
}

pub(crate) fn encode_be_i64(v: i64) -> [u8; 8] {
    v.to_be_bytes()
}

pub(crate) fn encode_be_i32(v: i32) -> [u8; 4] {
    v.to_be_bytes()
}

pub(crate) fn encode_be_u32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

pub(crate) fn decode_be_u32(bytes: &[u8]) -> crate::error::Result<u32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| crate::error::Error::Encoding("expected 4-byte u32".into()))?;
    Ok(u32::from_be_bytes(arr))
}

pub(crate) fn decode_be_i64(bytes: &[u8]) -> crate::error::Result<i64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| crate::error::Error::Encoding("expected 8-byte i64".into()))?;
    Ok(i64::from_be_bytes(arr))
}
