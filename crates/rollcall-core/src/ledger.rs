//! Append-only attendance ledger stored in SQLite.
//!
//! Each call opens the database, appends or scans inside a single
//! statement or transaction, and closes it again. Rows are never updated
//! or deleted.

use crate::types::{AttendanceRecord, AttendanceStatus, DashboardSummary};
use crate::DATE_FORMAT;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column headings of the ledger, in storage and export order.
pub const LEDGER_HEADER: [&str; 4] = ["Date & Time", "Student Name", "Roll Number", "Status"];

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS attendance (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    date_time    TEXT NOT NULL,
    student_name TEXT NOT NULL,
    roll_number  TEXT NOT NULL,
    status       TEXT NOT NULL
);";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to export ledger to {path}: {source}")]
    Export { path: PathBuf, source: io::Error },
}

/// A ledger row as stored. `status` is kept verbatim so rows written by
/// other tools are still counted the way they were recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRow {
    pub timestamp: String,
    pub name: String,
    pub roll_no: String,
    pub status: String,
}

impl LedgerRow {
    pub fn status(&self) -> Option<AttendanceStatus> {
        self.status.parse().ok()
    }

    fn fields(&self) -> [&str; 4] {
        [
            self.timestamp.as_str(),
            self.name.as_str(),
            self.roll_no.as_str(),
            self.status.as_str(),
        ]
    }
}

impl From<&AttendanceRecord> for LedgerRow {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            timestamp: record.timestamp_string(),
            name: record.name.clone(),
            roll_no: record.roll_no.clone(),
            status: record.status.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open for writing, creating the database and table when absent.
    fn open_rw(&self) -> Result<Connection, LedgerError> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Open for reading. `None` when the ledger has never been written.
    fn open_ro(&self) -> Result<Option<Connection>, LedgerError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let has_table: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'attendance')",
            [],
            |row| row.get(0),
        )?;
        Ok(has_table.then_some(conn))
    }

    /// Append one attendance event.
    pub fn append_record(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        self.append_row(&LedgerRow::from(record))?;
        tracing::info!(
            timestamp = %record.timestamp_string(),
            name = %record.name,
            roll_no = %record.roll_no,
            status = %record.status,
            "attendance recorded"
        );
        Ok(())
    }

    pub(crate) fn append_row(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let mut conn = self.open_rw()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO attendance (date_time, student_name, roll_number, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![row.timestamp, row.name, row.roll_no, row.status],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// All rows in append order.
    pub fn records(&self) -> Result<Vec<LedgerRow>, LedgerError> {
        let Some(conn) = self.open_ro()? else {
            return Ok(Vec::new());
        };
        let mut stmt = conn.prepare(
            "SELECT date_time, student_name, roll_number, status FROM attendance ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LedgerRow {
                    timestamp: row.get(0)?,
                    name: row.get(1)?,
                    roll_no: row.get(2)?,
                    status: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Counts for `today`. `total_students` is left at zero; the roster owns it.
    pub fn summarize(&self, today: NaiveDate) -> Result<DashboardSummary, LedgerError> {
        Ok(summarize_rows(&self.records()?, today))
    }

    /// Write the ledger as CSV (header row first). Returns the number of data rows.
    pub fn export_csv(&self, dest: &Path) -> Result<usize, LedgerError> {
        let rows = self.records()?;
        let export_err = |source| LedgerError::Export {
            path: dest.to_path_buf(),
            source,
        };

        let mut out = BufWriter::new(File::create(dest).map_err(export_err)?);
        write_csv_line(&mut out, &LEDGER_HEADER).map_err(export_err)?;
        for row in &rows {
            write_csv_line(&mut out, &row.fields()).map_err(export_err)?;
        }
        out.flush().map_err(export_err)?;

        tracing::info!(path = %dest.display(), rows = rows.len(), "ledger exported");
        Ok(rows.len())
    }
}

/// Rows whose timestamp starts with `today`'s `YYYY-MM-DD` prefix count
/// toward `total_today`; only recognized statuses land in a bucket.
pub fn summarize_rows(rows: &[LedgerRow], today: NaiveDate) -> DashboardSummary {
    let prefix = today.format(DATE_FORMAT).to_string();
    let mut summary = DashboardSummary::default();

    for row in rows.iter().filter(|r| r.timestamp.starts_with(&prefix)) {
        summary.total_today += 1;
        match row.status() {
            Some(AttendanceStatus::Present) => summary.present_today += 1,
            Some(AttendanceStatus::Absent) => summary.absent_today += 1,
            Some(AttendanceStatus::Leave) => summary.leave_today += 1,
            None => {
                tracing::debug!(status = %row.status, "unrecognized status counted toward total only");
            }
        }
    }

    summary
}

fn write_csv_line<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        if field.contains([',', '"', '\n', '\r']) {
            write!(out, "\"{}\"", field.replace('"', "\"\""))?;
        } else {
            out.write_all(field.as_bytes())?;
        }
    }
    out.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, crate::TIMESTAMP_FORMAT).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn record(ts: &str, name: &str, roll: &str, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            timestamp: at(ts),
            name: name.into(),
            roll_no: roll.into(),
            status,
        }
    }

    fn raw(ts: &str, status: &str) -> LedgerRow {
        LedgerRow {
            timestamp: ts.into(),
            name: "X".into(),
            roll_no: "1".into(),
            status: status.into(),
        }
    }

    #[test]
    fn test_first_append_creates_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.db"));
        assert!(ledger.records().unwrap().is_empty());
        assert!(!ledger.path().exists());

        ledger
            .append_record(&record("2024-01-01 09:00:00", "Alice", "101", AttendanceStatus::Present))
            .unwrap();

        assert_eq!(
            ledger.records().unwrap(),
            vec![LedgerRow {
                timestamp: "2024-01-01 09:00:00".into(),
                name: "Alice".into(),
                roll_no: "101".into(),
                status: "Present".into(),
            }]
        );
        assert_eq!(
            ledger.summarize(day("2024-01-01")).unwrap(),
            DashboardSummary {
                total_students: 0,
                total_today: 1,
                present_today: 1,
                absent_today: 0,
                leave_today: 0,
            }
        );
    }

    #[test]
    fn test_appends_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.db"));
        for (i, status) in AttendanceStatus::ALL.into_iter().enumerate() {
            ledger
                .append_record(&record(&format!("2024-01-01 09:00:0{i}"), "Bob", "202", status))
                .unwrap();
        }

        let statuses: Vec<_> = ledger.records().unwrap().into_iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec!["Present", "Absent", "Leave"]);
    }

    #[test]
    fn test_summarize_filters_by_day_and_buckets_status() {
        let rows = vec![
            raw("2024-01-01 08:00:00", "Present"),
            raw("2024-01-01 08:05:00", " absent "),
            raw("2024-01-01 08:10:00", "LEAVE"),
            raw("2024-01-01 08:15:00", "Late"),
            raw("2024-01-02 08:00:00", "Present"),
            raw("2023-12-31 23:59:59", "Present"),
        ];

        let summary = summarize_rows(&rows, day("2024-01-01"));
        assert_eq!(summary.total_today, 4);
        assert_eq!(summary.present_today, 1);
        assert_eq!(summary.absent_today, 1);
        assert_eq!(summary.leave_today, 1);
    }

    #[test]
    fn test_summarize_buckets_never_exceed_total() {
        let statuses = ["Present", "absent", "leave", "?", "", "Present "];
        let rows: Vec<_> = statuses.iter().map(|s| raw("2024-05-05 10:00:00", s)).collect();

        let s = summarize_rows(&rows, day("2024-05-05"));
        assert!(s.present_today + s.absent_today + s.leave_today <= s.total_today);
        assert_eq!(s.total_today, 6);
        assert_eq!(s.present_today + s.absent_today + s.leave_today, 4);

        let all_known: Vec<_> = rows.into_iter().filter(|r| r.status().is_some()).collect();
        let s = summarize_rows(&all_known, day("2024-05-05"));
        assert_eq!(s.present_today + s.absent_today + s.leave_today, s.total_today);
    }

    #[test]
    fn test_summarize_unrecognized_status_from_storage() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.db"));
        ledger.append_row(&raw("2024-01-01 09:00:00", "Excused")).unwrap();
        ledger.append_row(&raw("2024-01-01 09:01:00", "present")).unwrap();

        let s = ledger.summarize(day("2024-01-01")).unwrap();
        assert_eq!((s.total_today, s.present_today), (2, 1));
    }

    #[test]
    fn test_export_csv_header_and_quoting() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.db"));
        ledger
            .append_record(&record("2024-01-01 09:00:00", "Smith, \"Jo\"", "7", AttendanceStatus::Leave))
            .unwrap();

        let dest = dir.path().join("attendance.csv");
        assert_eq!(ledger.export_csv(&dest).unwrap(), 1);
        assert_eq!(
            std::fs::read_to_string(dest).unwrap(),
            "Date & Time,Student Name,Roll Number,Status\n\
             2024-01-01 09:00:00,\"Smith, \"\"Jo\"\"\",7,Leave\n"
        );
    }

    #[test]
    fn test_export_empty_ledger_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance.db"));
        let dest = dir.path().join("out.csv");

        assert_eq!(ledger.export_csv(&dest).unwrap(), 0);
        assert_eq!(
            std::fs::read_to_string(dest).unwrap(),
            "Date & Time,Student Name,Roll Number,Status\n"
        );
    }
}
