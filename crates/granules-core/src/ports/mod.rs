//! Ports - 抽象化レイヤー
//!
//! スケジューラはここの trait だけを相手にする。具体的なストア、runner、
//! observer は構築時に差し込む。

pub mod clock;
pub mod observer;
pub mod runner;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::observer::{NoopObserver, SchedulerObserver};
pub use self::runner::{KillSwitch, RunnerControl, RunnerError, RunnerExit, RunnerHandle, TaskRunner};
pub use self::task_store::TaskStore;
