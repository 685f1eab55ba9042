//! Transactional, ordered, observable store for HTTP shortcuts.
//!
//! The store keeps categories, shortcuts, variables, pending executions and
//! the app lock in one materialized state that changes only through atomic
//! units of work. It provides:
//! - Durability via a segmented, checksummed write-ahead log
//! - Stable id allocation and duplicate-free ordered collections
//! - Observers notified after each relevant commit, in commit order
//! - Edit-with-discard staging and a durable execution queue

pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
mod ordering;
pub mod queue;
pub mod record;
pub mod router;
pub mod staging;
pub mod state;
pub mod store;
pub mod txn;
pub mod wal;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use metrics::StoreMetrics;
pub use queue::ExecutionQueue;
pub use record::{Mutation, RecordBody, WalRecord};
pub use router::{EntityRef, Observed, Observer, SubscriptionId};
pub use staging::{ShortcutEditor, Stageable, StagingSession, VariableEditor};
pub use state::{Staged, StagedShortcut, StagedVariable, StateImage, StoreState};
pub use store::{CommitReceipt, Store, COPY_SUFFIX};
pub use txn::Transaction;
pub use wal::{IntegrityReport, SyncMode, WalConfig, WriteAheadLog};

pub use shortcuts_types as types;
