//! Production summaries computed from stored readings.
//!
//! Every reading carries the cumulative session count, so "sheets produced" in
//! a group is the largest count seen in it.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::config::defaults::MIN_OPERATING_HOURS_FOR_THROUGHPUT;
use crate::types::StoredReading;

/// Sheets produced per production order and machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub production_order_id: String,
    pub machine_id: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub sheets: u64,
}

/// Sheets per hour for one machine on one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineThroughput {
    pub machine_id: String,
    pub production_order_id: String,
    pub operating_hours: f64,
    pub sheets: u64,
    pub sheets_per_hour: f64,
}

/// Sheets per calendar day, machine and order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySheets {
    pub date: NaiveDate,
    pub machine_id: String,
    pub production_order_id: String,
    pub sheets: u64,
}

/// A summary row with a fixed column set.
///
/// `COLUMNS` must list the serialized field names in declaration order; the
/// CSV header is written from it so an empty report still has one.
pub trait ReportRow: Serialize {
    const COLUMNS: &'static [&'static str];
}

impl ReportRow for OrderSummary {
    const COLUMNS: &'static [&'static str] =
        &["production_order_id", "machine_id", "start", "end", "sheets"];
}

impl ReportRow for MachineThroughput {
    const COLUMNS: &'static [&'static str] = &[
        "machine_id",
        "production_order_id",
        "operating_hours",
        "sheets",
        "sheets_per_hour",
    ];
}

impl ReportRow for DailySheets {
    const COLUMNS: &'static [&'static str] =
        &["date", "machine_id", "production_order_id", "sheets"];
}

struct Span {
    start: NaiveDateTime,
    end: NaiveDateTime,
    sheets: u64,
}

/// Group by (order, machine) into time span and max count.
fn spans(readings: &[StoredReading]) -> BTreeMap<(String, String), Span> {
    let mut groups: BTreeMap<(String, String), Span> = BTreeMap::new();
    for stored in readings {
        let r = &stored.reading;
        let key = (r.production_order_id.clone(), r.machine_id.clone());
        groups
            .entry(key)
            .and_modify(|span| {
                span.start = span.start.min(r.timestamp);
                span.end = span.end.max(r.timestamp);
                span.sheets = span.sheets.max(r.sheet_count);
            })
            .or_insert(Span {
                start: r.timestamp,
                end: r.timestamp,
                sheets: r.sheet_count,
            });
    }
    groups
}

/// Per (order, machine): first and last reading time and sheets produced,
/// ordered by start time.
pub fn order_summary(readings: &[StoredReading]) -> Vec<OrderSummary> {
    let mut rows: Vec<OrderSummary> = spans(readings)
        .into_iter()
        .map(|((production_order_id, machine_id), span)| OrderSummary {
            production_order_id,
            machine_id,
            start: span.start,
            end: span.end,
            sheets: span.sheets,
        })
        .collect();
    rows.sort_by_key(|row| row.start);
    rows
}

/// Per (machine, order): operating hours, sheets and sheets per hour,
/// ordered by machine.
///
/// Groups that ran for less than a minute are left out; their rate would be
/// meaningless.
pub fn machine_throughput(readings: &[StoredReading]) -> Vec<MachineThroughput> {
    let mut rows: Vec<MachineThroughput> = spans(readings)
        .into_iter()
        .filter_map(|((production_order_id, machine_id), span)| {
            let operating_hours = (span.end - span.start).num_milliseconds() as f64 / 3_600_000.0;
            (operating_hours >= MIN_OPERATING_HOURS_FOR_THROUGHPUT).then(|| MachineThroughput {
                machine_id,
                production_order_id,
                operating_hours,
                sheets: span.sheets,
                sheets_per_hour: span.sheets as f64 / operating_hours,
            })
        })
        .collect();
    rows.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
    rows
}

/// Per (date, machine, order): the highest count reached that day.
pub fn daily_sheets(readings: &[StoredReading]) -> Vec<DailySheets> {
    let mut days: BTreeMap<(NaiveDate, String, String), u64> = BTreeMap::new();
    for stored in readings {
        let r = &stored.reading;
        let key = (
            r.timestamp.date(),
            r.machine_id.clone(),
            r.production_order_id.clone(),
        );
        let sheets = days.entry(key).or_insert(0);
        *sheets = (*sheets).max(r.sheet_count);
    }

    days.into_iter()
        .map(|((date, machine_id, production_order_id), sheets)| DailySheets {
            date,
            machine_id,
            production_order_id,
            sheets,
        })
        .collect()
}
