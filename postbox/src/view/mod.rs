//! The view subsystem: long-lived observers holding a
//! materialized projection of database state, each recomputing
//! incrementally from the operation log of every committed transaction.

pub mod account_records;
pub mod bag;
pub mod current_account;
pub mod item_collection_infos;
pub mod subscription;
