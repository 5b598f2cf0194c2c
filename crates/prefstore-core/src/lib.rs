//! PrefStore Core: Embeddable Durable Preference Store
//!
//! A string-to-string key-value store where every write, single or
//! multi-key, commits atomically to a single snapshot file.
//!
//! # Architecture
//!
//! - **Read path**: Serve from an immutable RAM snapshot, never waiting on writer I/O
//! - **Write path**: Validate everything, apply to a copy, replace the snapshot file, publish
//! - **Crash safety**: Write-temp-then-rename; an interrupted commit leaves the previous snapshot
//!
//! # Host Independence
//!
//! No UI framework or runtime bridge lives here. Hosts either call the typed
//! `KeyValueStore` methods or pass nullable `Request`s to `execute`.

pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod medium;
pub mod namespace;
pub mod platform_durability;
pub mod request;
pub mod store;

// Re-export key types for convenience
pub use config::Config;
pub use engine::{Mutation, Snapshot, StorageEngine};
pub use error::{StoreError, StoreResult};
pub use medium::{FileMedium, Medium, MemoryMedium};
pub use namespace::Namespaces;
pub use request::{Request, Response};
pub use store::KeyValueStore;
