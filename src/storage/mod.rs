//! Reading Storage
//!
//! Durable append-only storage for accepted distance readings, plus the read
//! interface the reporting layer uses. The sled store is the production
//! backend; the in-memory recorder backs tests and dry runs.

pub mod lockfile;
pub mod readings;
pub mod recorder;

pub use lockfile::ProcessLock;
pub use readings::ReadingStore;
pub use recorder::{InMemoryRecorder, PersistenceError, ReadingRecorder};
