//! App - アプリケーション層
//!
//! ports を組み合わせて、スケジューラとその方針を実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: ワイヤリングと起動時検証（Fail-fast）
//! - **Scheduler**: 定期制御ループ（回収→選択→dispatch→監視）
//! - **RetryPolicy**: リトライ上限とティア昇格
//! - **select_candidates**: dispatch 可否と Audit の後回しルール

pub mod builder;
pub mod retry;
pub mod scheduler;
pub mod selection;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, SchedulerBuilder};
pub use self::retry::RetryPolicy;
pub use self::scheduler::{DEFAULT_BOOTSTRAP, Phase, Scheduler, SchedulerSettings};
pub use self::selection::select_candidates;
