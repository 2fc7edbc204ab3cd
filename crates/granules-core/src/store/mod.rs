//! Task store implementations.

pub mod file;
pub mod memory;
mod state;

pub use self::file::FileStore;
pub use self::memory::MemoryStore;
