//! Ports - 抽象化レイヤー
//!
//! The worker loop only ever talks to these traits. File-backed
//! implementations run against a shared filesystem; in-memory ones make the
//! loop testable without one.

pub mod clock;
pub mod ledger_store;
pub mod lock;
pub mod work;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::ledger_store::LedgerStore;
pub use self::lock::{LockManager, LockToken, PollPolicy};
pub use self::work::{FnWork, WorkFunction, work_fn};
