//! Sled-backed reading store.

use std::path::Path;
use std::sync::Arc;

use super::recorder::{PersistenceError, ReadingRecorder};
use crate::types::{Reading, ReadingFilter, StoredReading};

/// Durable append-only storage for readings
///
/// Keys are sled-generated ids in big-endian form, so iteration order is
/// insertion order, also across restarts. Values are JSON-encoded [`Reading`]s.
#[derive(Clone)]
pub struct ReadingStore {
    db: Arc<sled::Db>,
}

impl ReadingStore {
    /// Open or create the store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref).map_err(|e| PersistenceError::Open {
            path: path_ref.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(path = ?path_ref, readings = db.len(), "[Storage] Reading store opened");

        Ok(Self { db: Arc::new(db) })
    }

    fn decode(key: &[u8], value: &[u8]) -> Result<StoredReading, PersistenceError> {
        let id_bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| {
                PersistenceError::Storage(format!("unexpected key length {}", key.len()))
            })?;
        let reading: Reading = serde_json::from_slice(value)?;
        Ok(StoredReading {
            id: u64::from_be_bytes(id_bytes),
            reading,
        })
    }

    /// Iterate decodable records, skipping (and logging) corrupt ones.
    fn scan<'a>(
        iter: impl Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>> + 'a,
    ) -> impl Iterator<Item = Result<StoredReading, PersistenceError>> + 'a {
        iter.filter_map(|item| match item {
            Ok((key, value)) => match Self::decode(&key, &value) {
                Ok(stored) => Some(Ok(stored)),
                Err(e) => {
                    tracing::warn!(error = %e, "[Storage] Skipping undecodable reading");
                    None
                }
            },
            Err(e) => Some(Err(e.into())),
        })
    }
}

impl ReadingRecorder for ReadingStore {
    fn insert(&self, reading: &Reading) -> Result<(), PersistenceError> {
        let id = self.db.generate_id()?;
        let value = serde_json::to_vec(reading)?;

        self.db.insert(id.to_be_bytes(), value)?;
        self.db.flush()?;

        tracing::debug!(id, count = reading.sheet_count, "[Storage] Reading stored");
        Ok(())
    }

    fn query(&self, filter: &ReadingFilter) -> Result<Vec<StoredReading>, PersistenceError> {
        let mut readings = Vec::new();
        for stored in Self::scan(self.db.iter()) {
            let stored = stored?;
            if filter.matches(&stored.reading) {
                readings.push(stored);
            }
        }

        tracing::debug!(matched = readings.len(), "[Storage] Query complete");
        Ok(readings)
    }

    fn count(&self) -> Result<usize, PersistenceError> {
        Ok(self.db.len())
    }

    fn latest_for(
        &self,
        machine_id: &str,
        production_order_id: &str,
    ) -> Result<Option<StoredReading>, PersistenceError> {
        for stored in Self::scan(self.db.iter().rev()) {
            let stored = stored?;
            if stored.reading.machine_id == machine_id
                && stored.reading.production_order_id == production_order_id
            {
                return Ok(Some(stored));
            }
        }
        Ok(None)
    }

    fn flush(&self) -> Result<(), PersistenceError> {
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}
