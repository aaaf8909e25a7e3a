//! Operator notification sink (speech in the kiosk binary).

/// Fire-and-forget announcements. Implementations must not fail the caller.
pub trait Announcer {
    fn announce(&self, text: &str);
}

/// Announcer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentAnnouncer;

impl Announcer for SilentAnnouncer {
    fn announce(&self, text: &str) {
        tracing::debug!(text, "announcement");
    }
}
