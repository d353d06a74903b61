//! landfall-state: persisted progress record for a deployment.
//!
//! One record per deployment attempt, stored as a single pretty-printed JSON
//! document so it can be read, diffed, or discarded by hand. The record
//! survives restarts and drives resume: phases already listed in
//! `completedPhases` are skipped on the next run.
//!
//! # Architecture
//!
//! ```text
//! StateStore (read-modify-write, transition checks, audit lines)
//!   └── dyn StateBackend
//!         ├── FileBackend   (temp file + rename)
//!         └── MemoryBackend (tests)
//! ```
//!
//! Completion (`status = COMPLETE`) is rejected unless
//! `databaseConnected = true` and `testedEndpointCount = requiredEndpointCount`.

pub mod backend;
pub mod error;
pub mod store;
pub mod types;

pub use backend::{FileBackend, MemoryBackend, StateBackend};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
