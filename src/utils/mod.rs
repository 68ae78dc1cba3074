pub mod archive;
pub mod command;
pub mod locker;
pub mod pg_dump;

// Trait-based abstraction for testability
pub mod dump_ops;

// Re-export commonly used types and traits (used by test crate)
pub use archive::{Artifact, CompressionFailure, Compressor};
pub use dump_ops::DumpInvoker;
pub use locker::{with_run_lock, LockError};
pub use pg_dump::{DumpFailure, PgDumpInvoker, RawDump};
