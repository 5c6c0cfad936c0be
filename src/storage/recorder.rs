//! ReadingRecorder trait: pluggable reading storage backend
//!
//! The counting session writes through this trait and the reporting layer
//! reads through it, so backends can be swapped without touching either:
//! - `ReadingStore`: embedded sled database, the production backend
//! - `InMemoryRecorder`: in-memory store for tests and dry runs

use std::sync::Arc;

use crate::types::{Reading, ReadingFilter, StoredReading};

/// Trait for pluggable reading storage backends
///
/// Implementations must be thread-safe (Send + Sync) so the reporting side
/// can read while a session writes.
pub trait ReadingRecorder: Send + Sync {
    /// Durably append one reading
    fn insert(&self, reading: &Reading) -> Result<(), PersistenceError>;

    /// All readings matching `filter`, in insertion order
    fn query(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, PersistenceError>;

    /// Number of stored readings
    fn count(&self) -> Result<usize, PersistenceError>;

    /// Most recent reading for a machine / order pair
    fn latest_for(
        &self,
        machine_id: &str,
        production_order_id: &str,
    ) -> Result<Option<StoredReading>, PersistenceError>;

    /// Push buffered writes to durable storage
    fn flush(&self) -> Result<(), PersistenceError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

impl<T: ReadingRecorder + ?Sized> ReadingRecorder for Arc<T> {
    fn insert(&self, reading: &Reading) -> Result<(), PersistenceError> {
        (**self).insert(reading)
    }

    fn query(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, PersistenceError> {
        (**self).query(filter)
    }

    fn count(&self) -> Result<usize, PersistenceError> {
        (**self).count()
    }

    fn latest_for(
        &self,
        machine_id: &str,
        production_order_id: &str,
    ) -> Result<Option<StoredReading>, PersistenceError> {
        (**self).latest_for(machine_id, production_order_id)
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        (**self).flush()
    }

    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to open store at {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sled::Error> for PersistenceError {
    fn from(e: sled::Error) -> Self {
        PersistenceError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serialization(e.to_string())
    }
}

/// In-memory persistence for tests and dry runs
///
/// Thread-safe via `RwLock`. Not durable; data is lost on restart.
#[derive(Default)]
pub struct InMemoryRecorder {
    readings: std::sync::RwLock<Vec<StoredReading>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadingRecorder for InMemoryRecorder {
    fn insert(&self, reading: &Reading) -> Result<(), PersistenceError> {
        let mut store = self
            .readings
            .write()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;

        let id = store.last().map_or(0, |r| r.id + 1);
        store.push(StoredReading {
            id,
            reading: reading.clone(),
        });
        Ok(())
    }

    fn query(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, PersistenceError> {
        let store = self
            .readings
            .read()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;

        Ok(store
            .iter()
            .filter(|r| filter.matches(&r.reading))
            .cloned()
            .collect())
    }

    fn count(&self) -> Result<usize, PersistenceError> {
        let store = self
            .readings
            .read()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;
        Ok(store.len())
    }

    fn latest_for(
        &self,
        machine_id: &str,
        production_order_id: &str,
    ) -> Result<Option<StoredReading>, PersistenceError> {
        let store = self
            .readings
            .read()
            .map_err(|e| PersistenceError::Storage(e.to_string()))?;

        Ok(store
            .iter()
            .rev()
            .find(|r| {
                r.reading.machine_id == machine_id
                    && r.reading.production_order_id == production_order_id
            })
            .cloned())
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StationIdentity;
    use chrono::NaiveDate;

    fn make_reading(machine: &str, order: &str, minute: u32, count: u64) -> Reading {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 2)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap();
        Reading::new(&StationIdentity::new(machine, order), ts, 50.0, count)
    }

    #[test]
    fn test_in_memory_insert_and_query() {
        let rec = InMemoryRecorder::new();
        rec.insert(&make_reading("m1", "o1", 0, 0)).unwrap();
        rec.insert(&make_reading("m2", "o1", 1, 0)).unwrap();
        rec.insert(&make_reading("m1", "o1", 2, 1)).unwrap();

        let all = rec.query(&ReadingFilter::all()).unwrap();
        assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 1, 2]);

        let m1 = rec.query(&ReadingFilter::all().machine("m1")).unwrap();
        assert_eq!(m1.len(), 2);
        assert_eq!(rec.count().unwrap(), 3);
    }

    #[test]
    fn test_in_memory_latest_for() {
        let rec = InMemoryRecorder::new();
        assert!(rec.latest_for("m1", "o1").unwrap().is_none());
        rec.insert(&make_reading("m1", "o1", 0, 4)).unwrap();
        rec.insert(&make_reading("m1", "o1", 1, 5)).unwrap();
        rec.insert(&make_reading("m1", "o2", 2, 9)).unwrap();

        let latest = rec.latest_for("m1", "o1").unwrap().unwrap();
        assert_eq!(latest.reading.sheet_count, 5);
    }

    #[test]
    fn test_trait_object_through_arc() {
        let shared = Arc::new(InMemoryRecorder::new());
        let rec: Box<dyn ReadingRecorder> = Box::new(Arc::clone(&shared));
        assert_eq!(rec.backend_name(), "InMemory");
        rec.insert(&make_reading("m", "o", 0, 0)).unwrap();
        assert_eq!(shared.count().unwrap(), 1);
    }
}
