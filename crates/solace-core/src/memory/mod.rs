//! Asynchronous memory subsystem: typed operations, the store capability,
//! and the single background writer that drains them.

pub mod op;
pub mod store;
pub mod writer;

pub use op::{dedupe_hash, MemoryKind, MemoryOp};
pub use store::{InMemoryStore, MemoryRecord, MemoryStore};
pub use writer::{spawn_memory_writer, MemoryWriterHandle, MemoryWriterStats};
