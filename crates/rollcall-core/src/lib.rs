//! rollcall-core: Attendance state and face matching for the rollcall kiosk.
//!
//! Holds the roster, the embedding gallery, the match policy and the
//! attendance ledger. Face detection and embedding extraction are supplied
//! by an implementation of [`FaceEmbedder`] (see `rollcall-vision`).

pub mod announce;
pub mod cache;
pub mod enrollment;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod recognition;
pub mod roster;
pub mod service;
pub mod types;

pub use announce::{Announcer, SilentAnnouncer};
pub use enrollment::{EnrollmentError, PendingEnrollment};
pub use gallery::{EmbedError, EmbeddingGallery, FaceEmbedder, GalleryError};
pub use ledger::{AttendanceLedger, LedgerError, LedgerRow};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_MATCH_TOLERANCE};
pub use recognition::{recognize_until_match, FrameSource, Recognition};
pub use roster::{RosterError, RosterStore};
pub use service::{Kiosk, KioskError, RecognizeOutcome, StudentCard};
pub use types::{
    normalize_name, AttendanceRecord, AttendanceStatus, DashboardSummary, Embedding, Student,
};

/// Timestamp layout used for every ledger row (local time, second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date prefix layout used to select today's ledger rows.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
