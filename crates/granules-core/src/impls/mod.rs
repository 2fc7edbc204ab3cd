//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **ProcessRunner**: タスクを外部ワーカープロセスとして実行する
//! - **LogObserver**: スケジューラの状態を `tracing` で報告する
//!
//! ストアの実装は `store` にある。

pub mod log_observer;
pub mod process_runner;

// 主要な型を再エクスポート
pub use self::log_observer::LogObserver;
pub use self::process_runner::ProcessRunner;
