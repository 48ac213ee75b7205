//! The Postbox façade: the crate's only public entry point. Wraps a
//! `Worker<E>` and exposes `open`, `transaction`, and the handful of
//! always-on subscriptions the account-manager core needs.

use rand::RngCore;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::{Backend, OpenOptions};
use crate::error::Result;
use crate::ids::AccountRecordId;
use crate::transaction::{Modifier, Worker};
use crate::value_box::durable::DurableValueBox;
use crate::value_box::memory::MemoryValueBox;
use crate::value_box::ValueBox;

/// An open postbox, backed by value box `E`.
pub struct Postbox<E: ValueBox> {
    worker: Worker<E>,
    /// Generated fresh at open time; tags every record created by
    /// `allocated_temporary_account_id` as reclaimable on next open.
    temporary_session_id: u64,
}

impl<E: ValueBox + 'static> Postbox<E> {
    /// Opens a postbox directly over an already-constructed `ValueBox`.
    /// Prefer `Postbox::open` for the standard in-memory/durable backends.
    pub fn open_with(value_box: E) -> Self {
        let temporary_session_id = rand::thread_rng().next_u64();
        log::info!("postbox opening, temporary_session_id={:x}", temporary_session_id);
        Self { worker: Worker::spawn(value_box), temporary_session_id }
    }

    pub fn temporary_session_id(&self) -> u64 {
        self.temporary_session_id
    }

    /// Submits `modifier_fn` to the single serialized worker and awaits the
    /// result of its commit.
    pub async fn transaction<F, T>(&self, modifier_fn: F) -> Result<T>
    where
        F: FnOnce(&mut Modifier<E>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.transaction(modifier_fn).await
    }

    /// A live view of every account record (`accountRecords`).
    pub async fn account_records(&self) -> Result<UnboundedReceiverStream<Vec<(AccountRecordId, Vec<u8>)>>> {
        self.transaction(|modifier| modifier.subscribe_account_records()).await.map(|(_, stream)| stream)
    }

    /// A live view of `keys` within the shared-data table (`sharedData`).
    pub async fn shared_data(
        &self,
        keys: Vec<Vec<u8>>,
    ) -> Result<UnboundedReceiverStream<Vec<(Vec<u8>, Option<Vec<u8>>)>>> {
        self.transaction(move |modifier| modifier.subscribe_shared_data(keys.clone())).await.map(|(_, stream)| stream)
    }

    /// A *distinct* live view of the current account id (`currentAccountId`).
    /// `allocate_if_not_exists` creates a fresh temporary account up front
    /// when none is set yet.
    pub async fn current_account_id(
        &self,
        allocate_if_not_exists: bool,
    ) -> Result<UnboundedReceiverStream<Option<AccountRecordId>>> {
        if allocate_if_not_exists {
            let temporary_session_id = self.temporary_session_id;
            self.transaction(move |modifier| {
                if modifier.current_account_id()?.is_none() {
                    let id = modifier
                        .allocate_temporary_account_id(temporary_session_id.to_be_bytes().to_vec())?;
                    modifier.set_current_account_id(Some(id))?;
                }
                Ok(())
            })
            .await?;
        }
        self.transaction(|modifier| modifier.subscribe_current_account_id()).await.map(|(_, stream)| stream)
    }

    /// Creates a fresh account record tagged with this process's
    /// `temporary_session_id` (`allocatedTemporaryAccountId`).
    pub async fn allocated_temporary_account_id(&self) -> Result<AccountRecordId> {
        let temporary_session_id = self.temporary_session_id;
        self.transaction(move |modifier| {
            modifier.allocate_temporary_account_id(temporary_session_id.to_be_bytes().to_vec())
        })
        .await
    }
}

impl Postbox<MemoryValueBox> {
    pub fn open_in_memory() -> Self {
        Self::open_with(MemoryValueBox::new())
    }
}

impl Postbox<DurableValueBox> {
    /// Opens (or creates) a durable postbox per `options`, compacting at
    /// open time if the configured garbage-ratio threshold is met.
    pub fn open(options: OpenOptions) -> Result<Self> {
        match options.backend {
            Backend::Memory => unreachable!("Postbox<DurableValueBox>::open called with a Memory backend"),
            Backend::Durable { path, compaction_garbage_ratio_threshold } => {
                let value_box = DurableValueBox::open_compacting(path, compaction_garbage_ratio_threshold)?;
                Ok(Self::open_with(value_box))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn transaction_result_round_trips() {
        let postbox = Postbox::open_in_memory();
        let value = postbox
            .transaction(|modifier| modifier.get_next_message_id_and_increment(1, 0))
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn allocated_temporary_account_id_creates_a_readable_record() {
        let postbox = Postbox::open_in_memory();
        let id = postbox.allocated_temporary_account_id().await.unwrap();
        let record = postbox.transaction(move |modifier| modifier.get_record(id)).await.unwrap();
        assert!(record.is_some());
    }

    #[tokio::test]
    async fn current_account_id_allocates_once_when_requested() {
        let postbox = Postbox::open_in_memory();
        let mut stream = postbox.current_account_id(true).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(first.is_some());

        // a second call with allocate_if_not_exists finds the existing one.
        let mut second_stream = postbox.current_account_id(true).await.unwrap();
        assert_eq!(second_stream.next().await.unwrap(), first);
    }

    #[tokio::test]
    async fn s1_fresh_counter_sequence() {
        let postbox = Postbox::open_in_memory();
        let first = postbox.transaction(|m| m.get_next_message_id_and_increment(7, 0)).await.unwrap();
        let second = postbox.transaction(|m| m.get_next_message_id_and_increment(7, 0)).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn s5_no_op_transaction_never_touches_shared_data_stream() {
        let postbox = Postbox::open_in_memory();
        let mut stream = postbox.shared_data(vec![b"k".to_vec()]).await.unwrap();
        stream.next().await.unwrap();

        postbox.transaction(|modifier| modifier.get_shared_data(b"k")).await.unwrap();

        // no snapshot should have been queued; the stream stays silent.
        let outcome = tokio::time::timeout(std::time::Duration::from_millis(20), stream.next()).await;
        assert!(outcome.is_err(), "expected no emission, got {:?}", outcome);
    }
}
