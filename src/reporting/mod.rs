//! Production Reports
//!
//! Read-only summaries over stored readings, exported as `;`-separated CSV or
//! pretty-printed JSON records. Reports only go through
//! [`ReadingRecorder::query`] and never write to the store. The sled backend
//! holds an exclusive file lock, so a report needs the counter stopped or a
//! copy of the data directory.

mod summaries;

pub use summaries::{
    daily_sheets, machine_throughput, order_summary, DailySheets, MachineThroughput, OrderSummary,
    ReportRow,
};

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::storage::{PersistenceError, ReadingRecorder};
use crate::types::ReadingFilter;

/// Which summary to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportKind {
    /// Sheets per production order
    Orders,
    /// Sheets per hour per machine
    Throughput,
    /// Sheets per day
    Daily,
}

impl ReportKind {
    fn file_stem(self) -> &'static str {
        match self {
            ReportKind::Orders => "sheets_per_order",
            ReportKind::Throughput => "throughput_per_machine",
            ReportKind::Daily => "sheets_per_day",
        }
    }
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read readings: {0}")]
    Query(#[from] PersistenceError),
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of a report run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutput {
    pub path: PathBuf,
    pub rows: usize,
}

/// Query `recorder`, build the `kind` summary and write it into `out_dir`.
pub fn generate<R: ReadingRecorder + ?Sized>(
    recorder: &R,
    filter: &ReadingFilter,
    kind: ReportKind,
    format: ExportFormat,
    out_dir: &Path,
) -> Result<ReportOutput, ReportError> {
    let readings = recorder.query(filter)?;
    tracing::debug!(readings = readings.len(), ?kind, "Building report");

    let path = out_dir.join(format!("{}.{}", kind.file_stem(), format.extension()));
    let rows = match kind {
        ReportKind::Orders => export(&order_summary(&readings), format, &path)?,
        ReportKind::Throughput => export(&machine_throughput(&readings), format, &path)?,
        ReportKind::Daily => export(&daily_sheets(&readings), format, &path)?,
    };

    tracing::info!(path = %path.display(), rows, "Report exported");
    Ok(ReportOutput { path, rows })
}

/// Write `rows` to `path`, creating the parent directory if needed.
///
/// CSV output always starts with the header row, even with no rows.
pub fn export<T: ReportRow>(
    rows: &[T],
    format: ExportFormat,
    path: &Path,
) -> Result<usize, ReportError> {
    let io_err = |source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let file = File::create(path).map_err(io_err)?;

    match format {
        ExportFormat::Csv => {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(b';')
                .has_headers(false)
                .from_writer(file);
            writer.write_record(T::COLUMNS)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush().map_err(io_err)?;
        }
        ExportFormat::Json => {
            let mut out = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut out, rows)?;
            out.flush().map_err(io_err)?;
        }
    }
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRecorder;
    use crate::types::{Reading, StationIdentity};
    use chrono::NaiveDate;

    fn seeded_recorder() -> InMemoryRecorder {
        let rec = InMemoryRecorder::new();
        let station = StationIdentity::new("maq001", "OP00123");
        for (minute, count) in [(0, 0), (30, 5), (59, 9)] {
            let ts = NaiveDate::from_ymd_opt(2024, 2, 20)
                .unwrap()
                .and_hms_opt(14, minute, 0)
                .unwrap();
            rec.insert(&Reading::new(&station, ts, 80.0, count)).unwrap();
        }
        rec
    }

    #[test]
    fn test_csv_export_uses_semicolons() {
        let dir = tempfile::tempdir().unwrap();
        let out = generate(
            &seeded_recorder(),
            &ReadingFilter::all(),
            ReportKind::Orders,
            ExportFormat::Csv,
            &dir.path().join("output"),
        )
        .unwrap();

        assert_eq!(out.rows, 1);
        assert!(out.path.ends_with("output/sheets_per_order.csv"));
        let text = fs::read_to_string(&out.path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("production_order_id;machine_id;start;end;sheets")
        );
        assert_eq!(
            lines.next(),
            Some("OP00123;maq001;2024-02-20T14:00:00;2024-02-20T14:59:00;9")
        );
    }

    #[test]
    fn test_json_export_is_record_array() {
        let dir = tempfile::tempdir().unwrap();
        let out = generate(
            &seeded_recorder(),
            &ReadingFilter::all().machine("maq001"),
            ReportKind::Daily,
            ExportFormat::Json,
            dir.path(),
        )
        .unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out.path).unwrap()).unwrap();
        let records = value.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["date"], "2024-02-20");
        assert_eq!(records[0]["sheets"], 9);
    }

    #[test]
    fn test_filter_with_no_matches_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = generate(
            &seeded_recorder(),
            &ReadingFilter::all().order("NOPE"),
            ReportKind::Throughput,
            ExportFormat::Csv,
            dir.path(),
        )
        .unwrap();
        assert_eq!(out.rows, 0);
        assert_eq!(
            fs::read_to_string(&out.path).unwrap(),
            "machine_id;production_order_id;operating_hours;sheets;sheets_per_hour\n"
        );
    }

    /// Header written from `COLUMNS` must match what serde emits for the row.
    fn serde_header<T: ReportRow>(row: &T) -> String {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .from_writer(Vec::new());
        writer.serialize(row).unwrap();
        let bytes = writer.into_inner().unwrap();
        String::from_utf8(bytes).unwrap().lines().next().unwrap().to_string()
    }

    #[test]
    fn test_columns_match_serialized_fields() {
        let readings = seeded_recorder().query(&ReadingFilter::all()).unwrap();

        let orders = order_summary(&readings);
        assert_eq!(serde_header(&orders[0]), OrderSummary::COLUMNS.join(";"));
        let throughput = machine_throughput(&readings);
        assert_eq!(serde_header(&throughput[0]), MachineThroughput::COLUMNS.join(";"));
        let daily = daily_sheets(&readings);
        assert_eq!(serde_header(&daily[0]), DailySheets::COLUMNS.join(";"));
    }
}
