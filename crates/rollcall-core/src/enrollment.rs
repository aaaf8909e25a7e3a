//! Enrollment: capture → pending review → commit or discard.
//!
//! A pending enrollment keeps the captured image in memory. Nothing touches
//! disk, the roster or the gallery until [`PendingEnrollment::confirm`].

use crate::cache::{digest_hex, EmbeddingCache};
use crate::gallery::{EmbedError, EmbeddingGallery, FaceEmbedder};
use crate::roster::{RosterError, RosterStore};
use crate::types::{normalize_name, Embedding, Student};
use image::{ImageFormat, RgbImage};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("{0}")]
    Validation(String),
    #[error("no face detected in captured photo")]
    NoFaceDetected,
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error("failed to write reference image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to store reference image {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Roster(#[from] RosterError),
}

/// A validated capture awaiting operator confirmation.
#[derive(Debug)]
pub struct PendingEnrollment {
    student: Student,
    image: RgbImage,
    embedding: Embedding,
}

/// Validate the form fields and extract the face embedding from `image`.
///
/// Fails with [`EnrollmentError::NoFaceDetected`] when the embedder finds no
/// face; the image is dropped with the error.
pub fn begin_enrollment<E: FaceEmbedder + ?Sized>(
    name: &str,
    roll_no: &str,
    image: RgbImage,
    embedder: &mut E,
) -> Result<PendingEnrollment, EnrollmentError> {
    // The name becomes the image file stem and a roster line; both must
    // agree with what a reload produces.
    let name = normalize_name(name);
    let name = name.as_str();
    let roll_no = roll_no.trim();
    validate_fields(name, roll_no)?;

    let embedding = embedder
        .detect_and_embed(&image)?
        .into_iter()
        .next()
        .ok_or(EnrollmentError::NoFaceDetected)?;

    tracing::info!(name, roll_no, dim = embedding.dim(), "enrollment pending confirmation");

    Ok(PendingEnrollment {
        student: Student::new(name, roll_no),
        image,
        embedding,
    })
}

fn validate_fields(name: &str, roll_no: &str) -> Result<(), EnrollmentError> {
    if name.is_empty() || roll_no.is_empty() {
        return Err(EnrollmentError::Validation(
            "Please enter both Name and Roll Number.".into(),
        ));
    }
    if roll_no.chars().any(char::is_whitespace) {
        return Err(EnrollmentError::Validation(
            "Roll number must not contain spaces.".into(),
        ));
    }
    // The name doubles as the reference image file stem.
    if name.starts_with('.') || name.contains(['/', '\\', '\0', '\n', '\r']) {
        return Err(EnrollmentError::Validation(format!(
            "Name {name:?} cannot be used as a photo file name."
        )));
    }
    Ok(())
}

impl PendingEnrollment {
    pub fn student(&self) -> &Student {
        &self.student
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn embedding(&self) -> &Embedding {
        &self.embedding
    }

    /// Commit the enrollment: reference image, roster entry, gallery entry.
    ///
    /// The image is staged and renamed into `faces_dir/<name>.jpg`, then the
    /// roster line is appended. A failed roster append puts the previous
    /// image back. The gallery is updated only once both have succeeded, and
    /// the cache refresh afterwards is best-effort.
    pub fn confirm(
        self,
        faces_dir: &Path,
        roster: &mut RosterStore,
        gallery: &mut EmbeddingGallery,
        cache: Option<&EmbeddingCache>,
    ) -> Result<PathBuf, EnrollmentError> {
        let name = &self.student.name;
        let final_path = faces_dir.join(format!("{name}.jpg"));
        let staged_path = faces_dir.join(format!(".{name}.jpg.staging"));
        let backup_path = faces_dir.join(format!(".{name}.jpg.previous"));

        self.image
            .save_with_format(&staged_path, ImageFormat::Jpeg)
            .map_err(|source| {
                discard(&staged_path);
                EnrollmentError::Image {
                    path: staged_path.clone(),
                    source,
                }
            })?;

        let had_previous = final_path.exists();
        if had_previous {
            if let Err(source) = std::fs::rename(&final_path, &backup_path) {
                discard(&staged_path);
                return Err(EnrollmentError::Io {
                    path: final_path,
                    source,
                });
            }
        }

        if let Err(source) = std::fs::rename(&staged_path, &final_path) {
            discard(&staged_path);
            if had_previous {
                restore(&backup_path, &final_path);
            }
            return Err(EnrollmentError::Io {
                path: final_path,
                source,
            });
        }

        if let Err(e) = roster.append(self.student.clone()) {
            discard(&final_path);
            if had_previous {
                restore(&backup_path, &final_path);
            }
            return Err(e.into());
        }

        if had_previous {
            discard(&backup_path);
        }

        if let Some(cache) = cache {
            refresh_cache(cache, name, &final_path, &self.embedding);
        }
        gallery.put(name.clone(), self.embedding);

        tracing::info!(
            name = %self.student.name,
            roll_no = %self.student.roll_no,
            path = %final_path.display(),
            "enrollment committed"
        );
        Ok(final_path)
    }

    /// Drop the capture. Nothing was persisted, so nothing changes.
    pub fn reject(self) {
        tracing::info!(name = %self.student.name, "enrollment rejected; capture discarded");
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

fn restore(backup: &Path, original: &Path) {
    if let Err(e) = std::fs::rename(backup, original) {
        tracing::error!(
            backup = %backup.display(),
            original = %original.display(),
            error = %e,
            "failed to restore previous reference image"
        );
    }
}

fn refresh_cache(cache: &EmbeddingCache, name: &str, path: &Path, embedding: &Embedding) {
    let result = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            cache
                .put(name, &digest_hex(&bytes), embedding)
                .map_err(|e| e.to_string())
        });
    if let Err(e) = result {
        tracing::warn!(name, error = %e, "failed to cache enrolled embedding");
    }
}
