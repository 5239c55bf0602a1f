//! # Solace Core
//!
//! Process-wide subsystems behind the Solace voice companion: the session
//! registry, the per-user scaffold cache, the memory writer queue, and the
//! gated background analyzer. Everything here is shared by all sessions and
//! initialized once at process start; nothing is lazily built on the hot
//! path.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod memory;
pub mod registry;
pub mod scaffold;

pub use analyzer::{ensure_analyzer_started, AnalyzerContext};
pub use config::SolaceConfig;
pub use error::{CoreError, CoreResult, FailureKind};
pub use memory::{
    dedupe_hash, spawn_memory_writer, InMemoryStore, MemoryKind, MemoryOp, MemoryRecord,
    MemoryStore, MemoryWriterHandle, MemoryWriterStats,
};
pub use registry::{RegistryStats, SessionRegistry};
pub use scaffold::{Scaffold, ScaffoldCache, ScaffoldEntry, ScaffoldOrigin, ScaffoldSnapshot};
