//! The subscription registry: a `Bag` of `(view, stream sender)`
//! pairs per concrete view type. The transaction driver drains this
//! registry's handles on every `beforeCommit`, replaying the transaction's
//! operation log into each view and pushing a fresh snapshot to any view
//! whose `replay` returned `true`.

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::Result;
use crate::ids::{AccountRecordId, Namespace};
use crate::operation::OperationLog;
use crate::table::item_collection::ItemCollectionTable;
use crate::table::records::RecordTable;
use crate::table::shared_data::SharedDataTable;
use crate::value_box::ValueBox;
use crate::view::account_records::{AccountRecordsView, AccountSharedDataView};
use crate::view::bag::{Bag, BagHandle};
use crate::view::current_account::CurrentAccountView;
use crate::view::item_collection_infos::{ItemCollectionInfosView, ItemCollectionSnapshot};

struct ItemCollectionSubscription {
    view: ItemCollectionInfosView,
    sender: mpsc::UnboundedSender<ItemCollectionSnapshot>,
}

/// Owns every live `ItemCollectionInfosView` subscription. One registry
/// instance per `Postbox`; lives on the worker.
#[derive(Default)]
pub struct ItemCollectionInfosRegistry {
    subscriptions: Bag<ItemCollectionSubscription>,
}

impl ItemCollectionInfosRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a view over `namespaces`, registers it, and emits the
    /// initial snapshot synchronously on the returned stream.
    pub fn subscribe<E: ValueBox>(
        &mut self,
        namespaces: Vec<Namespace>,
        table: &mut ItemCollectionTable,
        value_box: &mut E,
    ) -> Result<(BagHandle, UnboundedReceiverStream<ItemCollectionSnapshot>)> {
        let view = ItemCollectionInfosView::new(namespaces, table, value_box)?;
        let initial = view.snapshot().clone();
        let (sender, receiver) = mpsc::unbounded_channel();
        // A send failure here means the caller dropped the stream before
        // the initial snapshot was even read; nothing to do about it.
        let _ = sender.send(initial);
        let handle = self.subscriptions.insert(ItemCollectionSubscription { view, sender });
        Ok((handle, UnboundedReceiverStream::new(receiver)))
    }

    pub fn unsubscribe(&mut self, handle: BagHandle) {
        self.subscriptions.remove(handle);
    }

    /// Replays `log` into every live subscription, dropping (but not
    /// unsubscribing) any whose receiver has hung up.
    pub fn notify<E: ValueBox>(
        &mut self,
        log: &OperationLog,
        table: &mut ItemCollectionTable,
        value_box: &mut E,
    ) -> Result<()> {
        if log.item_collection_infos.is_empty() && log.item_collection_items.is_empty() {
            return Ok(());
        }
        for handle in self.subscriptions.handles() {
            let subscription = match self.subscriptions.get_mut(handle) {
                Some(subscription) => subscription,
                None => continue,
            };
            if subscription.view.replay(log, table, value_box)? {
                let _ = subscription.sender.send(subscription.view.snapshot().clone());
            }
        }
        Ok(())
    }
}

struct AccountRecordsSubscription {
    view: AccountRecordsView,
    sender: mpsc::UnboundedSender<Vec<(AccountRecordId, Vec<u8>)>>,
}

/// Owns every live `AccountRecordsView` subscription.
#[derive(Default)]
pub struct AccountRecordsRegistry {
    subscriptions: Bag<AccountRecordsSubscription>,
}

impl AccountRecordsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<E: ValueBox>(
        &mut self,
        table: &mut RecordTable,
        value_box: &mut E,
    ) -> Result<(BagHandle, UnboundedReceiverStream<Vec<(AccountRecordId, Vec<u8>)>>)> {
        let view = AccountRecordsView::new(table, value_box)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(view.snapshot().to_vec());
        let handle = self.subscriptions.insert(AccountRecordsSubscription { view, sender });
        Ok((handle, UnboundedReceiverStream::new(receiver)))
    }

    pub fn unsubscribe(&mut self, handle: BagHandle) {
        self.subscriptions.remove(handle);
    }

    pub fn notify<E: ValueBox>(
        &mut self,
        log: &OperationLog,
        table: &mut RecordTable,
        value_box: &mut E,
    ) -> Result<()> {
        if log.records.is_empty() {
            return Ok(());
        }
        for handle in self.subscriptions.handles() {
            let subscription = match self.subscriptions.get_mut(handle) {
                Some(subscription) => subscription,
                None => continue,
            };
            if subscription.view.replay(log, table, value_box)? {
                let _ = subscription.sender.send(subscription.view.snapshot().to_vec());
            }
        }
        Ok(())
    }
}

struct AccountSharedDataSubscription {
    view: AccountSharedDataView,
    sender: mpsc::UnboundedSender<Vec<(Vec<u8>, Option<Vec<u8>>)>>,
}

/// Owns every live `AccountSharedDataView` subscription, one per distinct
/// key set requested by a caller of `sharedData`.
#[derive(Default)]
pub struct AccountSharedDataRegistry {
    subscriptions: Bag<AccountSharedDataSubscription>,
}

impl AccountSharedDataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<E: ValueBox>(
        &mut self,
        keys: Vec<Vec<u8>>,
        table: &mut SharedDataTable,
        value_box: &mut E,
    ) -> Result<(BagHandle, UnboundedReceiverStream<Vec<(Vec<u8>, Option<Vec<u8>>)>>)> {
        let view = AccountSharedDataView::new(keys, table, value_box)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(view.snapshot().to_vec());
        let handle = self.subscriptions.insert(AccountSharedDataSubscription { view, sender });
        Ok((handle, UnboundedReceiverStream::new(receiver)))
    }

    pub fn unsubscribe(&mut self, handle: BagHandle) {
        self.subscriptions.remove(handle);
    }

    pub fn notify<E: ValueBox>(
        &mut self,
        log: &OperationLog,
        table: &mut SharedDataTable,
        value_box: &mut E,
    ) -> Result<()> {
        if log.updated_shared_data_keys.is_empty() {
            return Ok(());
        }
        for handle in self.subscriptions.handles() {
            let subscription = match self.subscriptions.get_mut(handle) {
                Some(subscription) => subscription,
                None => continue,
            };
            if subscription.view.replay(log, table, value_box)? {
                let _ = subscription.sender.send(subscription.view.snapshot().to_vec());
            }
        }
        Ok(())
    }
}

struct CurrentAccountSubscription {
    view: CurrentAccountView,
    sender: mpsc::UnboundedSender<Option<AccountRecordId>>,
}

/// Owns every live `currentAccountId` subscription (a "distinct" stream).
#[derive(Default)]
pub struct CurrentAccountRegistry {
    subscriptions: Bag<CurrentAccountSubscription>,
}

impl CurrentAccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        current: Option<AccountRecordId>,
    ) -> (BagHandle, UnboundedReceiverStream<Option<AccountRecordId>>) {
        let view = CurrentAccountView::new(current);
        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(view.snapshot());
        let handle = self.subscriptions.insert(CurrentAccountSubscription { view, sender });
        (handle, UnboundedReceiverStream::new(receiver))
    }

    pub fn unsubscribe(&mut self, handle: BagHandle) {
        self.subscriptions.remove(handle);
    }

    pub fn notify(&mut self, log: &OperationLog) -> Result<()> {
        if log.metadata.is_empty() {
            return Ok(());
        }
        for handle in self.subscriptions.handles() {
            let subscription = match self.subscriptions.get_mut(handle) {
                Some(subscription) => subscription,
                None => continue,
            };
            if subscription.view.replay(log)? {
                let _ = subscription.sender.send(subscription.view.snapshot());
            }
        }
        Ok(())
    }
}
