//! tally-core
//!
//! Durable completion tracking for batch jobs whose workers share a
//! filesystem.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, ledger, errors）
//! - **ports**: 抽象化レイヤー（LedgerStore, LockManager, WorkFunction, Clock）
//! - **impls**: 実装（FileLedgerStore, ExclusiveLock, MarkerLock, in-memory 版）
//! - **app**: ジョブ実行（JobBuilder, TaskLedger, WorkerLoop, WorkerGroup）
//! - **cache**: 自己修復する成果物キャッシュ
//! - **config**: TallyConfig（JSON ファイル / job ディレクトリ規約）

pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod enumerate;
pub mod impls;
pub mod ports;

pub(crate) mod fsutil;

pub use app::{Job, JobBuilder, LoopOptions, RetryPolicy, WorkerReport, WorkerState};
pub use cache::{ArtifactCache, CacheState};
pub use config::{LockMode, TallyConfig};
pub use domain::{Ledger, TallyError, TaskId, TaskStatus};
pub use enumerate::enumerate_dir;
pub use ports::{WorkFunction, work_fn};
