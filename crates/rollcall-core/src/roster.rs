//! Roster store backed by a flat text file.
//!
//! One student per line: whitespace-separated tokens, the last token is the
//! roll number and everything before it is the name.

use crate::types::{normalize_name, Student};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("failed to read roster {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to append to roster {path}: {source}")]
    Append { path: PathBuf, source: io::Error },
    #[error("invalid roster entry: {0}")]
    InvalidEntry(String),
}

/// In-memory roster plus its backing file.
#[derive(Debug, Clone)]
pub struct RosterStore {
    path: PathBuf,
    students: Vec<Student>,
}

impl RosterStore {
    /// An empty roster that will append to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            students: Vec::new(),
        }
    }

    /// Load the roster from `path`. A missing file is an empty roster.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, RosterError> {
        let path = path.into();
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "roster file absent, starting empty");
                return Ok(Self::empty(path));
            }
            Err(source) => return Err(RosterError::Read { path, source }),
        };

        let students: Vec<Student> = contents.lines().filter_map(parse_line).collect();
        tracing::info!(path = %path.display(), count = students.len(), "roster loaded");

        Ok(Self { path, students })
    }

    /// Re-read the backing file, replacing the in-memory roster.
    pub fn reload(&mut self) -> Result<(), RosterError> {
        *self = Self::load(self.path.clone())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }

    /// First student (file order) whose roll number equals or ends with `query`.
    pub fn find_by_roll(&self, query: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.roll_matches(query))
    }

    /// Case-insensitive exact match on name.
    pub fn find_by_name(&self, query: &str) -> Option<&Student> {
        let query = query.to_lowercase();
        self.students
            .iter()
            .find(|s| s.name.to_lowercase() == query)
    }

    /// Append `student` to the backing file, then to the in-memory roster.
    ///
    /// The name is stored with its whitespace collapsed, the form a reload
    /// yields. The in-memory roster is untouched if the file write fails.
    pub fn append(&mut self, mut student: Student) -> Result<(), RosterError> {
        student.name = normalize_name(&student.name);
        validate(&student)?;

        let append_err = |source| RosterError::Append {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(append_err)?;
        writeln!(file, "{} {}", student.name, student.roll_no).map_err(append_err)?;
        file.flush().map_err(append_err)?;

        tracing::info!(name = %student.name, roll_no = %student.roll_no, "student added to roster");
        self.students.push(student);
        Ok(())
    }
}

/// Reject entries that would not survive a round trip through the file format.
fn validate(student: &Student) -> Result<(), RosterError> {
    if student.name.trim().is_empty() || student.roll_no.is_empty() {
        return Err(RosterError::InvalidEntry(
            "name and roll number are required".into(),
        ));
    }
    if student.roll_no.chars().any(char::is_whitespace) {
        return Err(RosterError::InvalidEntry(format!(
            "roll number {:?} must not contain whitespace",
            student.roll_no
        )));
    }
    if student.name.contains(['\n', '\r']) {
        return Err(RosterError::InvalidEntry(format!(
            "name {:?} must be a single line",
            student.name
        )));
    }
    Ok(())
}

fn parse_line(line: &str) -> Option<Student> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (roll_no, name) = tokens.split_last()?;
    if name.is_empty() {
        return None;
    }
    Some(Student::new(name.join(" "), *roll_no))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_roster(dir: &Path) -> RosterStore {
        let path = dir.join("students.txt");
        std::fs::write(&path, "Alice 101\nBob 202\n").unwrap();
        RosterStore::load(path).unwrap()
    }

    #[test]
    fn test_parse_line_multi_token_name() {
        assert_eq!(
            parse_line("Mary  Jane Watson   CS-042"),
            Some(Student::new("Mary Jane Watson", "CS-042"))
        );
    }

    #[test]
    fn test_parse_line_skips_short_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("Loner"), None);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let roster = RosterStore::load(dir.path().join("nope.txt")).unwrap();
        assert!(roster.is_empty());
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.txt");
        std::fs::write(&path, "Alice 101\nbroken\n\nCarol Ann 303\n").unwrap();

        let roster = RosterStore::load(path).unwrap();
        assert_eq!(
            roster.students(),
            &[Student::new("Alice", "101"), Student::new("Carol Ann", "303")]
        );
    }

    #[test]
    fn test_find_by_roll_scenarios() {
        let dir = tempfile::tempdir().unwrap();
        let roster = sample_roster(dir.path());

        assert_eq!(roster.find_by_roll("01").map(|s| s.name.as_str()), Some("Alice"));
        assert_eq!(roster.find_by_roll("202").map(|s| s.name.as_str()), Some("Bob"));
        assert_eq!(roster.find_by_roll(""), None);
        assert_eq!(roster.find_by_roll("999"), None);
    }

    #[test]
    fn test_find_by_roll_first_in_file_order_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.txt");
        std::fs::write(&path, "Dup One 501\nDup Two 501\nOther 1501\n").unwrap();
        let roster = RosterStore::load(path).unwrap();

        assert_eq!(roster.find_by_roll("501").map(|s| s.name.as_str()), Some("Dup One"));
        assert_eq!(roster.find_by_roll("1501").map(|s| s.name.as_str()), Some("Other"));
    }

    #[test]
    fn test_find_by_name_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let roster = sample_roster(dir.path());

        assert_eq!(roster.find_by_name("alice").map(|s| s.roll_no.as_str()), Some("101"));
        assert_eq!(roster.find_by_name("BOB").map(|s| s.roll_no.as_str()), Some("202"));
        assert_eq!(roster.find_by_name("Ali"), None);
    }

    #[test]
    fn test_append_round_trip_preserves_existing() {
        let dir = tempfile::tempdir().unwrap();
        let mut roster = sample_roster(dir.path());

        roster.append(Student::new("Dana Scully", "X-7")).unwrap();
        assert_eq!(roster.len(), 3);

        let reloaded = RosterStore::load(roster.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.students(), roster.students());
        assert_eq!(reloaded.students()[0], Student::new("Alice", "101"));
        assert_eq!(reloaded.students()[2], Student::new("Dana Scully", "X-7"));
    }

    #[test]
    fn test_append_collapses_name_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let mut roster = RosterStore::empty(dir.path().join("students.txt"));

        roster.append(Student::new("Mary  Jane", "101")).unwrap();
        roster.append(Student::new("Tab\tName", "102")).unwrap();

        let reloaded = RosterStore::load(roster.path().to_path_buf()).unwrap();
        assert_eq!(reloaded.students(), roster.students());
        assert_eq!(
            reloaded.students(),
            &[Student::new("Mary Jane", "101"), Student::new("Tab Name", "102")]
        );
        assert_eq!(roster.find_by_name("mary jane").map(|s| s.roll_no.as_str()), Some("101"));
    }

    #[test]
    fn test_append_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.txt");
        let mut roster = RosterStore::load(path.clone()).unwrap();

        roster.append(Student::new("Eve", "9")).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Eve 9\n");
    }

    #[test]
    fn test_append_rejects_whitespace_roll() {
        let dir = tempfile::tempdir().unwrap();
        let mut roster = RosterStore::empty(dir.path().join("students.txt"));

        let err = roster.append(Student::new("Eve", "1 2")).unwrap_err();
        assert!(matches!(err, RosterError::InvalidEntry(_)));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_append_failure_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the file makes the open fail.
        let path = dir.path().join("students.txt");
        std::fs::create_dir(&path).unwrap();
        let mut roster = RosterStore::empty(path);

        assert!(matches!(
            roster.append(Student::new("Eve", "9")),
            Err(RosterError::Append { .. })
        ));
        assert!(roster.is_empty());
    }
}
