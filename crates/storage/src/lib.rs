// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! taskd-storage: durable task ledger.
//!
//! The store is event-sourced: every mutation appends an event to a
//! JSONL write-ahead log and is fsynced before the call returns, then
//! applied to the in-memory ledger. Boot recovery loads the newest
//! snapshot and replays the WAL tail.

pub mod checkpoint;
pub mod ledger;
pub mod snapshot;
pub mod store;
pub mod wal;

pub use checkpoint::{CheckpointError, CheckpointHandle, CheckpointResult, Checkpointer};
pub use ledger::Ledger;
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use store::{ClaimFilter, Store, StoreError};
pub use wal::{Wal, WalEntry, WalError};
