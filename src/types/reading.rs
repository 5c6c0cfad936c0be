//! Persisted reading records and the filter used to read them back.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Machine + production order a session counts for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationIdentity {
    pub machine_id: String,
    pub production_order_id: String,
}

impl StationIdentity {
    pub fn new(machine_id: impl Into<String>, production_order_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            production_order_id: production_order_id.into(),
        }
    }
}

impl From<&crate::config::StationConfig> for StationIdentity {
    fn from(station: &crate::config::StationConfig) -> Self {
        Self::new(&station.machine_id, &station.production_order_id)
    }
}

/// One accepted distance sample as written to the store.
///
/// Written once per parsed sample whether or not a sheet was counted.
/// Never modified after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub machine_id: String,
    pub production_order_id: String,
    /// Local wall-clock time the line arrived
    pub timestamp: NaiveDateTime,
    pub distance_cm: f64,
    /// Session sheet count after this sample was applied
    pub sheet_count: u64,
}

impl Reading {
    pub fn new(
        station: &StationIdentity,
        timestamp: NaiveDateTime,
        distance_cm: f64,
        sheet_count: u64,
    ) -> Self {
        Self {
            machine_id: station.machine_id.clone(),
            production_order_id: station.production_order_id.clone(),
            timestamp,
            distance_cm,
            sheet_count,
        }
    }
}

/// A reading together with the id the store assigned to it.
///
/// Ids grow with insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: u64,
    #[serde(flatten)]
    pub reading: Reading,
}

/// Selection over persisted readings. Empty filter matches everything.
///
/// Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadingFilter {
    pub machine_id: Option<String>,
    pub production_order_id: Option<String>,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl ReadingFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn machine(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = Some(machine_id.into());
        self
    }

    pub fn order(mut self, production_order_id: impl Into<String>) -> Self {
        self.production_order_id = Some(production_order_id.into());
        self
    }

    pub fn between(mut self, from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn matches(&self, reading: &Reading) -> bool {
        self.machine_id
            .as_deref()
            .map_or(true, |m| m == reading.machine_id)
            && self
                .production_order_id
                .as_deref()
                .map_or(true, |o| o == reading.production_order_id)
            && self.from.map_or(true, |from| reading.timestamp >= from)
            && self.to.map_or(true, |to| reading.timestamp <= to)
    }
}
