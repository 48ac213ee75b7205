//! The transaction driver: a single serialized worker owning
//! every table, the subscription registry, and the underlying `ValueBox`.
//! Modifier functions are submitted as boxed closures over an unbounded
//! channel; the worker drains the channel, runs the two-phase commit
//! pipeline, and delivers the result through a oneshot.

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::ids::{AccountRecordId, Namespace, PeerId};
use crate::operation::{MetadataOperation, OperationLog};
use crate::table::item_collection::ItemCollectionTable;
use crate::table::metadata::MetadataTable;
use crate::table::records::RecordTable;
use crate::table::shared_data::SharedDataTable;
use crate::table::Table;
use crate::value_box::ValueBox;
use crate::view::item_collection_infos::ItemCollectionSnapshot;
use crate::view::subscription::{
    AccountRecordsRegistry, AccountSharedDataRegistry, CurrentAccountRegistry, ItemCollectionInfosRegistry,
};

/// Reserved shared-data key the current account id is persisted under.
/// Lives in the ordinary shared-data keyspace so it benefits from the same
/// equality-gated write and durability story as any other shared datum.
const CURRENT_ACCOUNT_ID_KEY: &[u8] = b"\0postbox:current_account_id";

/// Reserved shared-data key backing the monotonic account-record id
/// allocator used by `allocated_temporary_account_id`.
const NEXT_ACCOUNT_RECORD_ID_KEY: &[u8] = b"\0postbox:next_account_record_id";

/// Owns all per-postbox state touched only by the worker.
pub(crate) struct PostboxState<E: ValueBox> {
    pub value_box: E,
    pub metadata: MetadataTable,
    pub records: RecordTable,
    pub shared_data: SharedDataTable,
    pub item_collections: ItemCollectionTable,
    pub item_collection_views: ItemCollectionInfosRegistry,
    pub account_records_views: AccountRecordsRegistry,
    pub account_shared_data_views: AccountSharedDataRegistry,
    pub current_account_views: CurrentAccountRegistry,
    pub log: OperationLog,
}

impl<E: ValueBox> PostboxState<E> {
    pub fn new(value_box: E) -> Self {
        Self {
            value_box,
            metadata: MetadataTable::new(),
            records: RecordTable::new(),
            shared_data: SharedDataTable::new(),
            item_collections: ItemCollectionTable::new(),
            item_collection_views: ItemCollectionInfosRegistry::new(),
            account_records_views: AccountRecordsRegistry::new(),
            account_shared_data_views: AccountSharedDataRegistry::new(),
            current_account_views: CurrentAccountRegistry::new(),
            log: OperationLog::new(),
        }
    }

    fn current_account_id(&mut self) -> Result<Option<AccountRecordId>> {
        match self.shared_data.get(&mut self.value_box, CURRENT_ACCOUNT_ID_KEY)? {
            Some(bytes) => Ok(Some(AccountRecordId(crate::ids::decode_be_i64(&bytes)?))),
            None => Ok(None),
        }
    }
}

type Job<E> = Box<dyn FnOnce(&mut PostboxState<E>) + Send>;

/// The handle a modifier function mutates. Thin forwarding façade over
/// `PostboxState` so a modifier never sees the worker's channel plumbing.
pub struct Modifier<'a, E: ValueBox> {
    state: &'a mut PostboxState<E>,
}

impl<'a, E: ValueBox> Modifier<'a, E> {
    pub fn get_next_message_id_and_increment(&mut self, peer_id: PeerId, namespace: Namespace) -> Result<u32> {
        self.state.metadata.get_next_message_id_and_increment(&mut self.state.value_box, peer_id, namespace)
    }

    pub fn get_next_stable_message_index_id(&mut self) -> Result<u32> {
        self.state.metadata.get_next_stable_message_index_id(&mut self.state.value_box)
    }

    pub fn get_next_peer_operation_log_index(&mut self) -> Result<u32> {
        self.state.metadata.get_next_peer_operation_log_index(&mut self.state.value_box)
    }

    pub fn is_chat_list_initialized(&mut self) -> Result<bool> {
        self.state.metadata.is_chat_list_initialized(&mut self.state.value_box)
    }

    pub fn set_chat_list_initialized(&mut self) -> Result<()> {
        self.state.metadata.set_chat_list_initialized(&mut self.state.value_box)
    }

    pub fn is_peer_history_initialized(&mut self, peer_id: PeerId) -> Result<bool> {
        self.state.metadata.is_peer_history_initialized(&mut self.state.value_box, peer_id)
    }

    pub fn set_peer_history_initialized(&mut self, peer_id: PeerId) -> Result<()> {
        self.state.metadata.set_peer_history_initialized(&mut self.state.value_box, peer_id)
    }

    pub fn get_chat_list_total_unread_state(&mut self) -> Result<crate::codec::ChatListTotalUnreadState> {
        self.state.metadata.get_chat_list_total_unread_state(&mut self.state.value_box)
    }

    pub fn set_chat_list_total_unread_state(
        &mut self,
        state: crate::codec::ChatListTotalUnreadState,
    ) -> Result<()> {
        self.state.metadata.set_chat_list_total_unread_state(&mut self.state.value_box, state)
    }

    pub fn get_record(&mut self, id: AccountRecordId) -> Result<Option<Vec<u8>>> {
        self.state.records.get(&mut self.state.value_box, id)
    }

    pub fn get_records(&mut self) -> Result<Vec<(AccountRecordId, Vec<u8>)>> {
        self.state.records.get_records(&mut self.state.value_box)
    }

    pub fn set_record(&mut self, id: AccountRecordId, value: Vec<u8>) -> Result<()> {
        self.state.records.set(&mut self.state.value_box, &mut self.state.log, id, value)
    }

    pub fn remove_record(&mut self, id: AccountRecordId) -> Result<()> {
        self.state.records.remove(&mut self.state.value_box, &mut self.state.log, id)
    }

    pub fn get_shared_data(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.state.shared_data.get(&mut self.state.value_box, key)
    }

    pub fn get_shared_data_many(&mut self, keys: &[Vec<u8>]) -> Result<Vec<(Vec<u8>, Option<Vec<u8>>)>> {
        self.state.shared_data.get_many(&mut self.state.value_box, keys)
    }

    pub fn set_shared_data(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.state.shared_data.set(&mut self.state.value_box, &mut self.state.log, key, value)
    }

    pub fn remove_shared_data(&mut self, key: Vec<u8>) -> Result<()> {
        self.state.shared_data.remove(&mut self.state.value_box, &mut self.state.log, key)
    }

    pub fn get_item_collection_infos(&mut self, namespace: Namespace) -> Result<Vec<(i64, Vec<u8>)>> {
        self.state.item_collections.get_infos(&mut self.state.value_box, namespace)
    }

    pub fn replace_item_collection_infos(
        &mut self,
        namespace: Namespace,
        infos: Vec<(i64, Vec<u8>)>,
    ) -> Result<()> {
        self.state.item_collections.replace_infos(
            &mut self.state.value_box,
            &mut self.state.log,
            namespace,
            infos,
        )
    }

    pub fn replace_item_collection_items(
        &mut self,
        collection_id: crate::ids::ItemCollectionId,
        items: Vec<(crate::ids::ItemCollectionItemKey, Vec<u8>)>,
    ) -> Result<()> {
        self.state.item_collections.replace_items(
            &mut self.state.value_box,
            &mut self.state.log,
            collection_id,
            items,
        )
    }

    /// Subscribes to `ItemCollectionInfosView(namespaces)` from inside this
    /// transaction, so the initial snapshot is read consistently with
    /// whatever else the transaction does.
    pub fn subscribe_item_collection_infos(
        &mut self,
        namespaces: Vec<Namespace>,
    ) -> Result<(
        crate::view::bag::BagHandle,
        tokio_stream::wrappers::UnboundedReceiverStream<ItemCollectionSnapshot>,
    )> {
        self.state.item_collection_views.subscribe(
            namespaces,
            &mut self.state.item_collections,
            &mut self.state.value_box,
        )
    }

    pub fn subscribe_account_records(
        &mut self,
    ) -> Result<(
        crate::view::bag::BagHandle,
        tokio_stream::wrappers::UnboundedReceiverStream<Vec<(AccountRecordId, Vec<u8>)>>,
    )> {
        self.state.account_records_views.subscribe(&mut self.state.records, &mut self.state.value_box)
    }

    pub fn subscribe_shared_data(
        &mut self,
        keys: Vec<Vec<u8>>,
    ) -> Result<(
        crate::view::bag::BagHandle,
        tokio_stream::wrappers::UnboundedReceiverStream<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
    )> {
        self.state.account_shared_data_views.subscribe(keys, &mut self.state.shared_data, &mut self.state.value_box)
    }

    pub fn current_account_id(&mut self) -> Result<Option<AccountRecordId>> {
        self.state.current_account_id()
    }

    pub fn subscribe_current_account_id(
        &mut self,
    ) -> Result<(
        crate::view::bag::BagHandle,
        tokio_stream::wrappers::UnboundedReceiverStream<Option<AccountRecordId>>,
    )> {
        let current = self.current_account_id()?;
        Ok(self.state.current_account_views.subscribe(current))
    }

    /// Sets the current account id, persisting it to shared data and
    /// emitting a `MetadataOperation::CurrentAccountIdChanged` (equality
    /// gated: a no-op if it already holds `id`).
    pub fn set_current_account_id(&mut self, id: Option<AccountRecordId>) -> Result<()> {
        let before = self.current_account_id()?;
        if before == id {
            return Ok(());
        }
        match id {
            Some(id) => self.set_shared_data(CURRENT_ACCOUNT_ID_KEY.to_vec(), id.encode())?,
            None => self.remove_shared_data(CURRENT_ACCOUNT_ID_KEY.to_vec())?,
        }
        self.state.log.metadata.push(MetadataOperation::CurrentAccountIdChanged(id));
        Ok(())
    }

    /// Creates a fresh account record tagged with `temporary_session_id`,
    /// returning its freshly allocated id (`allocatedTemporaryAccountId`).
    /// IDs are drawn from a dedicated reserved-shared-data counter, distinct
    /// from the history metadata table's per-peer message counters.
    pub fn allocate_temporary_account_id(&mut self, encoded_tag: Vec<u8>) -> Result<AccountRecordId> {
        let next = match self.get_shared_data(NEXT_ACCOUNT_RECORD_ID_KEY)? {
            Some(bytes) => crate::ids::decode_be_i64(&bytes)?,
            None => 1,
        };
        self.set_shared_data(NEXT_ACCOUNT_RECORD_ID_KEY.to_vec(), (next + 1).to_be_bytes().to_vec())?;

        let id = AccountRecordId(next);
        self.set_record(id, encoded_tag)?;
        Ok(id)
    }
}

fn invalidate_all_caches<E: ValueBox>(state: &mut PostboxState<E>) {
    log::error!("storage fault: invalidating every table's memory cache");
    state.metadata = MetadataTable::new();
    state.records = RecordTable::new();
    state.shared_data = SharedDataTable::new();
    state.item_collections = ItemCollectionTable::new();
    state.log.clear();
}

/// `beforeCommit` pipeline: views are notified before tables flush, so
/// observers see a consistent logical state that is bit-identical to what a
/// fresh read-only transaction would see immediately after commit.
fn before_commit<E: ValueBox>(state: &mut PostboxState<E>) -> Result<()> {
    if !state.log.records.is_empty() || !state.log.metadata.is_empty() {
        state.account_records_views.notify(&state.log, &mut state.records, &mut state.value_box)?;
        state.current_account_views.notify(&state.log)?;
    }
    if !state.log.updated_shared_data_keys.is_empty() {
        state.account_shared_data_views.notify(&state.log, &mut state.shared_data, &mut state.value_box)?;
    }
    state.item_collection_views.notify(&state.log, &mut state.item_collections, &mut state.value_box)?;

    state.log.clear();

    Table::before_commit(&mut state.metadata, &mut state.value_box)?;
    Table::before_commit(&mut state.records, &mut state.value_box)?;
    Table::before_commit(&mut state.shared_data, &mut state.value_box)?;
    Table::before_commit(&mut state.item_collections, &mut state.value_box)?;
    Ok(())
}

fn fault<E: ValueBox, T>(state: &mut PostboxState<E>, err: Error) -> Result<T> {
    if matches!(err, Error::Storage(_)) {
        invalidate_all_caches(state);
    }
    Err(err)
}

fn run_transaction<E, F, T>(state: &mut PostboxState<E>, modifier_fn: F) -> Result<T>
where
    E: ValueBox,
    F: FnOnce(&mut Modifier<E>) -> Result<T>,
{
    if let Err(err) = state.value_box.begin() {
        return fault(state, err);
    }

    let result = {
        let mut modifier = Modifier { state };
        modifier_fn(&mut modifier)
    };
    let value = match result {
        Ok(value) => value,
        Err(err) => return fault(state, err),
    };

    if let Err(err) = before_commit(state) {
        return fault(state, err);
    }
    if let Err(err) = state.value_box.commit() {
        return fault(state, err);
    }

    log::debug!("transaction committed");
    Ok(value)
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// A running worker: the single serialized owner of a `PostboxState`.
pub(crate) struct Worker<E: ValueBox> {
    sender: mpsc::UnboundedSender<Job<E>>,
}

impl<E: ValueBox + 'static> Worker<E> {
    pub fn spawn(value_box: E) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job<E>>();
        tokio::spawn(async move {
            let mut state = PostboxState::new(value_box);
            while let Some(job) = receiver.recv().await {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&mut state)));
                if let Err(payload) = outcome {
                    log::error!("worker job panicked: {}; invalidating caches", panic_message(&payload));
                    invalidate_all_caches(&mut state);
                }
            }
            log::info!("postbox worker shutting down, channel closed");
        });
        Self { sender }
    }

    /// Enqueues `modifier_fn` on the worker and returns its eventual result.
    pub async fn transaction<F, T>(&self, modifier_fn: F) -> Result<T>
    where
        F: FnOnce(&mut Modifier<E>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<E> = Box::new(move |state| {
            let result = run_transaction(state, modifier_fn);
            let _ = reply_tx.send(result);
        });
        self.sender.send(job).map_err(|_| Error::WorkerGone)?;
        reply_rx.await.map_err(|_| Error::WorkerGone)?
    }
}
