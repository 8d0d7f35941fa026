//! Impls - ports の実装
//!
//! # 本番用
//! - **FileLedgerStore**: shared-filesystem JSON ledger
//! - **ExclusiveLock**: atomic marker with owner token and lease
//! - **MarkerLock**: plain poll-then-create marker (compatibility)
//!
//! # テスト用
//! - **InMemoryLedgerStore**, **InMemoryLock**

pub mod exclusive_lock;
pub mod file_ledger;
pub mod inmem_ledger;
pub mod inmem_lock;
pub mod marker_lock;

pub use self::exclusive_lock::{DEFAULT_LEASE, ExclusiveLock};
pub use self::file_ledger::FileLedgerStore;
pub use self::inmem_ledger::InMemoryLedgerStore;
pub use self::inmem_lock::InMemoryLock;
pub use self::marker_lock::MarkerLock;
