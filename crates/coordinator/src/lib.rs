//! Render coordination: stampede prevention and failure limiting.
//!
//! Many worker processes may receive the same thumbnail request at the
//! same moment. This crate makes sure at most one of them performs the
//! expensive render (per distinct render key, cluster-wide) and that
//! renders which keep failing stop being attempted for a while.
//!
//! All true serialization lives in a shared [`CoordinationStore`] with
//! atomic increment and compare-and-set semantics; no in-process locks
//! are involved. Two implementations ship: a SQLite-backed store for
//! clusters sharing a database, and an in-memory store for single-node
//! deployments and tests.

pub mod coordinator;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use coordinator::{FAILURE_LIMIT, CoordinatorError, RenderCoordinator, RenderWork};
pub use error::{CoordinationError, CoordinationResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{AcquireOutcome, CoordinationStore, RenderKey, RenderPool};
