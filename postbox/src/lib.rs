//! `postbox` is the embedded, transactional key/value core underpinning a
//! messaging client: atomic multi-table updates, in-memory write buffering,
//! and live reactive views that recompute incrementally as transactions
//! commit.
//!
//! The store is owned by a single serialized worker (see [`transaction`]);
//! every [`Postbox::transaction`] call enqueues a modifier function onto
//! that worker and awaits its result once the commit pipeline finishes.
//!
//! ## Getting started
//!
//! ```rust
//! use postbox::Postbox;
//!
//! #[tokio::main]
//! async fn main() -> postbox::error::Result<()> {
//!     let postbox = Postbox::open_in_memory();
//!
//!     let first_id = postbox
//!         .transaction(|modifier| modifier.get_next_message_id_and_increment(7, 0))
//!         .await?;
//!     assert_eq!(first_id, 1);
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod operation;
pub mod postbox;
pub mod table;
pub mod transaction;
pub mod value_box;
pub mod view;

pub use crate::config::{Backend, OpenOptions};
pub use crate::error::{Error, Result};
pub use crate::postbox::Postbox;
pub use crate::transaction::Modifier;
