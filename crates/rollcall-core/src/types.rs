use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TIMESTAMP_FORMAT;

/// An enrolled student. `roll_no` is the identity key, `name` is display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub name: String,
    pub roll_no: String,
}

impl Student {
    pub fn new(name: impl Into<String>, roll_no: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roll_no: roll_no.into(),
        }
    }

    /// Exact-or-suffix roll number match. An empty query never matches.
    pub fn roll_matches(&self, query: &str) -> bool {
        !query.is_empty() && (self.roll_no == query || self.roll_no.ends_with(query))
    }
}

/// Collapse runs of whitespace (tabs included) to single spaces and trim.
///
/// The roster file splits names on whitespace, so only normalized names
/// survive a write and reload unchanged.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Face embedding vector (dimensionality fixed by the extractor, 512 for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Vectors of different length are never comparable and report
    /// `f32::INFINITY`, so they can never fall inside a match tolerance.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Attendance status recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Leave,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 3] = [Self::Present, Self::Absent, Self::Leave];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Leave => "Leave",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized attendance status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for AttendanceStatus {
    type Err = ParseStatusError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "leave" => Ok(Self::Leave),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

/// One attendance event. Records are only ever appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub timestamp: NaiveDateTime,
    pub name: String,
    pub roll_no: String,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    /// `YYYY-MM-DD HH:MM:SS` rendering stored in the ledger.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Counts derived from the ledger for a single day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub total_students: usize,
    pub total_today: usize,
    pub present_today: usize,
    pub absent_today: usize,
    pub leave_today: usize,
}
