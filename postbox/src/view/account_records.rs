//! `AccountRecordsView` and `AccountSharedDataView`: the account-manager
//! core's own record-observing and shared-data-observing views. The
//! account-manager schema itself is an external collaborator; these views
//! only expose what the core needs to keep `accountRecords` and
//! `sharedData` subscriptions live.

use crate::error::Result;
use crate::ids::AccountRecordId;
use crate::operation::OperationLog;
use crate::table::records::RecordTable;
use crate::table::shared_data::SharedDataTable;
use crate::value_box::ValueBox;

pub struct AccountRecordsView {
    snapshot: Vec<(AccountRecordId, Vec<u8>)>,
}

impl AccountRecordsView {
    pub fn new<E: ValueBox>(table: &mut RecordTable, value_box: &mut E) -> Result<Self> {
        Ok(Self { snapshot: table.get_records(value_box)? })
    }

    pub fn snapshot(&self) -> &[(AccountRecordId, Vec<u8>)] {
        &self.snapshot
    }

    pub fn replay<E: ValueBox>(
        &mut self,
        log: &OperationLog,
        table: &mut RecordTable,
        value_box: &mut E,
    ) -> Result<bool> {
        if log.records.is_empty() {
            return Ok(false);
        }
        self.snapshot = table.get_records(value_box)?;
        Ok(true)
    }
}

pub struct AccountSharedDataView {
    keys: Vec<Vec<u8>>,
    snapshot: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl AccountSharedDataView {
    pub fn new<E: ValueBox>(keys: Vec<Vec<u8>>, table: &mut SharedDataTable, value_box: &mut E) -> Result<Self> {
        let snapshot = table.get_many(value_box, &keys)?;
        Ok(Self { keys, snapshot })
    }

    pub fn snapshot(&self) -> &[(Vec<u8>, Option<Vec<u8>>)] {
        &self.snapshot
    }

    pub fn replay<E: ValueBox>(
        &mut self,
        log: &OperationLog,
        table: &mut SharedDataTable,
        value_box: &mut E,
    ) -> Result<bool> {
        if !self.keys.iter().any(|key| log.updated_shared_data_keys.contains(key)) {
            return Ok(false);
        }
        self.snapshot = table.get_many(value_box, &self.keys)?;
        Ok(true)
    }
}
