//! Test infrastructure shared by unit and integration tests.

pub mod memory;

pub use memory::{LogEntry, MemoryConnection, MemoryCopy, MemoryDb};
