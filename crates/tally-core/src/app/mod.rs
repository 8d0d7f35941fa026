//! App - ports を組み合わせたジョブ実行ロジック
//!
//! # 主要コンポーネント
//! - **JobBuilder / Job**: store・lock・policy のワイヤリング
//! - **TaskLedger**: reload → mutate → save（ロックの内側で呼ぶ）
//! - **WorkerLoop**: claim → execute → commit の状態機械
//! - **WorkerGroup**: 同一 ledger を共有する N 個の WorkerLoop
//! - **RetryPolicy**: 一時的なストレージ障害の再試行

pub mod builder;
pub mod retry;
pub mod status;
pub mod task_ledger;
pub mod worker_group;
pub mod worker_loop;

pub use self::builder::{Job, JobBuilder};
pub use self::retry::{RetryPolicy, retry};
pub use self::status::LedgerCounts;
pub use self::task_ledger::{TaskLedger, under_lock};
pub use self::worker_group::{ShutdownHandle, WorkerGroup};
pub use self::worker_loop::{LoopOptions, TaskFailure, WorkerLoop, WorkerReport, WorkerState};
