//! Kiosk operations: the actions an operator triggers, wired to the stores.

use crate::announce::{Announcer, SilentAnnouncer};
use crate::cache::EmbeddingCache;
use crate::enrollment::{self, EnrollmentError, PendingEnrollment};
use crate::gallery::{find_photo, EmbedError, EmbeddingGallery, FaceEmbedder};
use crate::ledger::{AttendanceLedger, LedgerError};
use crate::matcher::{MatchOutcome, Matcher};
use crate::recognition::{recognize_until_match, FrameSource};
use crate::roster::{RosterError, RosterStore};
use crate::types::{AttendanceRecord, AttendanceStatus, DashboardSummary, Student};
use chrono::{NaiveDate, NaiveDateTime};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KioskError {
    /// A required field was empty or malformed. Nothing changed.
    #[error("{0}")]
    Validation(String),
    /// Unknown roll number or name. Nothing changed.
    #[error("{0}")]
    NotFound(String),
    #[error("No face detected in captured photo.")]
    NoFaceDetected,
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Enrollment(EnrollmentError),
}

impl From<EnrollmentError> for KioskError {
    fn from(e: EnrollmentError) -> Self {
        match e {
            EnrollmentError::Validation(msg) => Self::Validation(msg),
            EnrollmentError::NoFaceDetected => Self::NoFaceDetected,
            EnrollmentError::Embed(e) => Self::Embed(e),
            EnrollmentError::Roster(e) => Self::Roster(e),
            other => Self::Enrollment(other),
        }
    }
}

/// A looked-up student with their reference photo, if one exists.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentCard {
    pub student: Student,
    pub photo: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognizeOutcome {
    Marked {
        record: AttendanceRecord,
        distance: f32,
    },
    NotRecognized {
        frames_examined: usize,
    },
}

/// Everything the kiosk holds for its lifetime, passed in explicitly.
pub struct Kiosk {
    roster: RosterStore,
    gallery: EmbeddingGallery,
    ledger: AttendanceLedger,
    faces_dir: PathBuf,
    cache: Option<EmbeddingCache>,
    announcer: Box<dyn Announcer>,
}

impl Kiosk {
    pub fn new(
        roster: RosterStore,
        gallery: EmbeddingGallery,
        ledger: AttendanceLedger,
        faces_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            roster,
            gallery,
            ledger,
            faces_dir: faces_dir.into(),
            cache: None,
            announcer: Box::new(SilentAnnouncer),
        }
    }

    pub fn with_announcer(mut self, announcer: Box<dyn Announcer>) -> Self {
        self.announcer = announcer;
        self
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn gallery(&self) -> &EmbeddingGallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }

    pub fn faces_dir(&self) -> &Path {
        &self.faces_dir
    }

    /// Replace the gallery, e.g. after loading it once the models are ready.
    pub fn set_gallery(&mut self, gallery: EmbeddingGallery) {
        self.gallery = gallery;
    }

    fn lookup_roll(&self, roll: &str) -> Result<&Student, KioskError> {
        let roll = roll.trim();
        if roll.is_empty() {
            return Err(KioskError::Validation("Please enter a roll number.".into()));
        }
        self.roster
            .find_by_roll(roll)
            .ok_or_else(|| KioskError::NotFound("Student not found.".into()))
    }

    pub fn search_student(&self, roll: &str) -> Result<StudentCard, KioskError> {
        let student = self.lookup_roll(roll)?.clone();
        self.announcer.announce(&format!("Hello {}", student.name));
        let photo = find_photo(&self.faces_dir, &student.name);
        Ok(StudentCard { student, photo })
    }

    /// Record `status` for the student matching `roll`, stamped `at`.
    pub fn mark_attendance(
        &self,
        roll: &str,
        status: AttendanceStatus,
        at: NaiveDateTime,
    ) -> Result<AttendanceRecord, KioskError> {
        let student = self.lookup_roll(roll)?;
        self.record_attendance(student, status, at)
    }

    fn record_attendance(
        &self,
        student: &Student,
        status: AttendanceStatus,
        at: NaiveDateTime,
    ) -> Result<AttendanceRecord, KioskError> {
        let record = AttendanceRecord {
            timestamp: at,
            name: student.name.clone(),
            roll_no: student.roll_no.clone(),
            status,
        };
        self.ledger.append_record(&record)?;
        self.announcer.announce(&format!(
            "Attendance marked for {} as {}.",
            record.name, record.status
        ));
        Ok(record)
    }

    /// Recognize a face from `source` and mark that student present.
    ///
    /// `now` is read once, when the match is found, to stamp the record.
    pub fn recognize_and_mark<S, E, M>(
        &self,
        source: &mut S,
        embedder: &mut E,
        matcher: &M,
        tolerance: f32,
        should_stop: impl FnMut() -> bool,
        now: impl FnOnce() -> NaiveDateTime,
    ) -> Result<RecognizeOutcome, KioskError>
    where
        S: FrameSource + ?Sized,
        E: FaceEmbedder + ?Sized,
        M: Matcher + ?Sized,
    {
        let recognition =
            recognize_until_match(source, embedder, &self.gallery, matcher, tolerance, should_stop)?;

        let MatchOutcome::Matched { name, distance } = recognition.outcome else {
            self.announcer.announce("Face not recognized. Please try again.");
            return Ok(RecognizeOutcome::NotRecognized {
                frames_examined: recognition.frames_examined,
            });
        };

        let Some(student) = self.roster.find_by_name(&name) else {
            tracing::warn!(name = %name, "recognized face has no roster entry");
            self.announcer.announce("Student details not found.");
            return Err(KioskError::NotFound(
                "Recognized face but student details not found.".into(),
            ));
        };

        let record = self.record_attendance(student, AttendanceStatus::Present, now())?;
        Ok(RecognizeOutcome::Marked { record, distance })
    }

    pub fn dashboard(&self, today: NaiveDate) -> Result<DashboardSummary, KioskError> {
        let mut summary = self.ledger.summarize(today)?;
        summary.total_students = self.roster.len();
        Ok(summary)
    }

    pub fn begin_enrollment<E: FaceEmbedder + ?Sized>(
        &self,
        name: &str,
        roll_no: &str,
        image: RgbImage,
        embedder: &mut E,
    ) -> Result<PendingEnrollment, KioskError> {
        Ok(enrollment::begin_enrollment(name, roll_no, image, embedder)?)
    }

    pub fn confirm_enrollment(&mut self, pending: PendingEnrollment) -> Result<PathBuf, KioskError> {
        let name = pending.student().name.clone();
        let path = pending.confirm(
            &self.faces_dir,
            &mut self.roster,
            &mut self.gallery,
            self.cache.as_ref(),
        )?;
        self.announcer.announce(&format!("{name} registered successfully!"));
        Ok(path)
    }

    pub fn reject_enrollment(&self, pending: PendingEnrollment) {
        pending.reject();
    }
}
