//! `currentAccountId`: a *distinct* stream — it only emits when the
//! current account actually changes, never merely because a transaction
//! touched metadata operations.

use crate::error::Result;
use crate::ids::AccountRecordId;
use crate::operation::{MetadataOperation, OperationLog};

pub struct CurrentAccountView {
    current: Option<AccountRecordId>,
}

impl CurrentAccountView {
    pub fn new(current: Option<AccountRecordId>) -> Self {
        Self { current }
    }

    pub fn snapshot(&self) -> Option<AccountRecordId> {
        self.current
    }

    /// Replays metadata operations, returning `true` only if the current
    /// account id actually changed value (distinct semantics).
    pub fn replay(&mut self, log: &OperationLog) -> Result<bool> {
        let mut changed = false;
        for op in &log.metadata {
            let MetadataOperation::CurrentAccountIdChanged(new_value) = op;
            if *new_value != self.current {
                self.current = *new_value;
                changed = true;
            }
        }
        Ok(changed)
    }
}
