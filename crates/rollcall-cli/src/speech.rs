//! Spoken announcements through an external text-to-speech program.

use rollcall_core::Announcer;
use std::process::{Command, Stdio};

/// Runs `<program> [args..] <text>` for each announcement without waiting.
pub struct SpeechAnnouncer {
    program: String,
    args: Vec<String>,
}

impl SpeechAnnouncer {
    /// Build from a command line such as `espeak -s 150`.
    /// Returns `None` when the command is blank.
    pub fn from_command(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Announcer for SpeechAnnouncer {
    fn announce(&self, text: &str) {
        tracing::info!(text, "announcement");
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            // Reap in the background so the caller never blocks on speech.
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => {
                tracing::warn!(program = %self.program, error = %e, "speech unavailable");
            }
        }
    }
}
