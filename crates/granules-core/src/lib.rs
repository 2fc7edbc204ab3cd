//! granules-core
//!
//! Control plane for a pool of autonomous workers pulling tasks ("granules")
//! from a shared queue.
//!
//! # Modules
//! - **domain**: ids, task classes, claim state, task records, store errors
//! - **ports**: traits at the edges (TaskStore, TaskRunner, SchedulerObserver, Clock)
//! - **store**: in-memory and file-backed task stores
//! - **app**: scheduler, builder, retry policy, candidate selection
//! - **impls**: process runner and logging observer
//! - **tools**: named tool operations over a store
//! - **server**: HTTP tool server (JSON-RPC and REST) over the shared store
//! - **prompts**: per-class worker instructions
//! - **config**, **session**, **runtime**: configuration, session log, wiring

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod prompts;
pub mod runtime;
pub mod server;
pub mod session;
pub mod store;
pub mod tools;

pub use self::app::{Scheduler, SchedulerBuilder};
pub use self::config::GranulesConfig;
pub use self::error::GranulesError;
pub use self::runtime::Runtime;
