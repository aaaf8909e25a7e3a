//! Embedding gallery: one reference embedding per student name.
//!
//! Loaded from a directory of labeled reference images (`<name>.jpg` /
//! `<name>.png`) through a [`FaceEmbedder`], optionally short-circuited by
//! the [`EmbeddingCache`].

use crate::cache::{digest_hex, EmbeddingCache};
use crate::matcher::{MatchOutcome, Matcher};
use crate::types::Embedding;
use image::RgbImage;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reference image extensions, matched case-insensitively.
pub const GALLERY_EXTENSIONS: [&str; 2] = ["jpg", "png"];

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("face model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("face embedding failed: {0}")]
    Inference(String),
}

/// External face detector + embedder.
///
/// Returns zero or more embeddings, one per detected face, in the
/// detector's own order. Callers expecting a single face use the first.
pub trait FaceEmbedder {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError>;
}

impl<E: FaceEmbedder + ?Sized> FaceEmbedder for &mut E {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        (**self).detect_and_embed(image)
    }
}

impl<E: FaceEmbedder + ?Sized> FaceEmbedder for Box<E> {
    fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
        (**self).detect_and_embed(image)
    }
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to read gallery directory {path}: {source}")]
    ReadDir { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Embed(#[from] EmbedError),
}

/// Name → embedding mapping held as parallel sequences so the matcher can
/// index names and vectors together.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingGallery {
    names: Vec<String>,
    vectors: Vec<Embedding>,
}

impl EmbeddingGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the gallery from every reference image in `dir`.
    ///
    /// Files are visited in name order. Images that cannot be read or decoded,
    /// or that contain no face, are skipped with a warning. When one name has
    /// several images only the first is used.
    pub fn load<E: FaceEmbedder>(
        dir: &Path,
        embedder: &mut E,
        cache: Option<&EmbeddingCache>,
    ) -> Result<Self, GalleryError> {
        let mut paths = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|source| GalleryError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| GalleryError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && is_gallery_image(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut gallery = Self::new();
        let mut cache_hits = 0usize;

        for path in &paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping image with non-UTF-8 name");
                continue;
            };
            // `<name>.jpg` sorts before `<name>.png` and wins, like `find_photo`.
            if gallery.contains(name) {
                tracing::warn!(path = %path.display(), "duplicate reference image ignored");
                continue;
            }

            let bytes = match std::fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    continue;
                }
            };
            let digest = digest_hex(&bytes);

            if let Some(cached) = cache.and_then(|c| cached_embedding(c, name, &digest)) {
                tracing::debug!(name, "embedding cache hit");
                cache_hits += 1;
                gallery.put(name, cached);
                continue;
            }

            let image = match image::load_from_memory(&bytes) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping undecodable image");
                    continue;
                }
            };

            let Some(embedding) = embedder.detect_and_embed(&image)?.into_iter().next() else {
                tracing::warn!(path = %path.display(), "no face detected; image skipped");
                continue;
            };

            if let Some(c) = cache {
                if let Err(e) = c.put(name, &digest, &embedding) {
                    tracing::warn!(name, error = %e, "failed to cache embedding");
                }
            }
            gallery.put(name, embedding);
        }

        tracing::info!(
            dir = %dir.display(),
            images = paths.len(),
            entries = gallery.len(),
            cache_hits,
            "gallery loaded"
        );
        Ok(gallery)
    }

    /// Insert or overwrite the embedding for `name`. Overwrites keep their slot.
    pub fn put(&mut self, name: impl Into<String>, embedding: Embedding) {
        let name = name.into();
        match self.names.iter().position(|n| *n == name) {
            Some(idx) => self.vectors[idx] = embedding,
            None => {
                self.names.push(name);
                self.vectors.push(embedding);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| &self.vectors[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn vectors(&self) -> &[Embedding] {
        &self.vectors
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Match `probe` against this gallery.
    pub fn best_match<M: Matcher + ?Sized>(
        &self,
        probe: &Embedding,
        matcher: &M,
        tolerance: f32,
    ) -> MatchOutcome {
        matcher.compare(probe, &self.names, &self.vectors, tolerance)
    }
}

fn cached_embedding(cache: &EmbeddingCache, name: &str, digest: &str) -> Option<Embedding> {
    match cache.get(name, digest) {
        Ok(hit) => hit,
        Err(e) => {
            tracing::warn!(name, error = %e, "embedding cache lookup failed");
            None
        }
    }
}

/// Whether `path` has one of the [`GALLERY_EXTENSIONS`].
pub fn is_gallery_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| GALLERY_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Reference photo for `name` in `dir`, preferring `.jpg` over `.png`.
pub fn find_photo(dir: &Path, name: &str) -> Option<PathBuf> {
    GALLERY_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|p| p.is_file())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::matcher::EuclideanMatcher;
    use image::Rgb;

    /// Treats the top-left pixel as the "face": black means no face,
    /// anything else embeds as its normalized RGB triple.
    #[derive(Default)]
    pub(crate) struct PixelEmbedder {
        pub calls: usize,
    }

    impl FaceEmbedder for PixelEmbedder {
        fn detect_and_embed(&mut self, image: &RgbImage) -> Result<Vec<Embedding>, EmbedError> {
            self.calls += 1;
            let Rgb([r, g, b]) = *image.get_pixel(0, 0);
            if (r, g, b) == (0, 0, 0) {
                return Ok(Vec::new());
            }
            Ok(vec![pixel_embedding([r, g, b])])
        }
    }

    pub(crate) fn pixel_embedding(rgb: [u8; 3]) -> Embedding {
        Embedding::new(rgb.iter().map(|&c| c as f32 / 255.0).collect())
    }

    pub(crate) fn solid(rgb: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(4, 4, Rgb(rgb))
    }

    pub(crate) fn write_png(dir: &Path, file: &str, rgb: [u8; 3]) {
        solid(rgb)
            .save_with_format(dir.join(file), image::ImageFormat::Png)
            .unwrap();
    }

    #[test]
    fn test_load_skips_faceless_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "Alice.png", [255, 0, 0]);
        write_png(dir.path(), "Bob.PNG", [0, 255, 0]);
        write_png(dir.path(), "Nobody.png", [0, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();
        std::fs::write(dir.path().join("Broken.jpg"), "garbage").unwrap();

        let mut embedder = PixelEmbedder::default();
        let gallery = EmbeddingGallery::load(dir.path(), &mut embedder, None).unwrap();

        assert_eq!(gallery.names(), &["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(gallery.get("Alice"), Some(&pixel_embedding([255, 0, 0])));
        assert!(!gallery.contains("Nobody"));
        assert_eq!(embedder.calls, 3);
    }

    #[test]
    fn test_load_missing_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = EmbeddingGallery::load(&dir.path().join("missing"), &mut PixelEmbedder::default(), None);
        assert!(matches!(result, Err(GalleryError::ReadDir { .. })));
    }

    #[test]
    fn test_load_uses_cache_until_image_changes() {
        let dir = tempfile::tempdir().unwrap();
        let faces = dir.path().join("faces");
        std::fs::create_dir(&faces).unwrap();
        write_png(&faces, "Alice.png", [10, 20, 30]);
        let cache = EmbeddingCache::new(dir.path().join("embeddings.db"));

        let mut embedder = PixelEmbedder::default();
        EmbeddingGallery::load(&faces, &mut embedder, Some(&cache)).unwrap();
        let gallery = EmbeddingGallery::load(&faces, &mut embedder, Some(&cache)).unwrap();
        assert_eq!(embedder.calls, 1);
        assert_eq!(gallery.get("Alice"), Some(&pixel_embedding([10, 20, 30])));

        write_png(&faces, "Alice.png", [40, 50, 60]);
        let gallery = EmbeddingGallery::load(&faces, &mut embedder, Some(&cache)).unwrap();
        assert_eq!(embedder.calls, 2);
        assert_eq!(gallery.get("Alice"), Some(&pixel_embedding([40, 50, 60])));
    }

    #[test]
    fn test_put_overwrites_in_place() {
        let mut gallery = EmbeddingGallery::new();
        gallery.put("Alice", Embedding::new(vec![1.0]));
        gallery.put("Bob", Embedding::new(vec![2.0]));
        gallery.put("Alice", Embedding::new(vec![3.0]));

        assert_eq!(gallery.names(), &["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(gallery.vectors()[0], Embedding::new(vec![3.0]));
        assert_eq!(gallery.len(), gallery.vectors().len());
    }

    #[test]
    fn test_best_match_exact_probe() {
        let mut gallery = EmbeddingGallery::new();
        gallery.put("Alice", Embedding::new(vec![0.1, 0.2]));
        gallery.put("Bob", Embedding::new(vec![0.8, 0.9]));

        let outcome = gallery.best_match(&Embedding::new(vec![0.1, 0.2]), &EuclideanMatcher, 0.6);
        assert_eq!(outcome.name(), Some("Alice"));
    }

    #[test]
    fn test_find_photo_prefers_jpg() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "Alice.png", [1, 1, 1]);
        assert_eq!(find_photo(dir.path(), "Alice"), Some(dir.path().join("Alice.png")));

        std::fs::write(dir.path().join("Alice.jpg"), b"x").unwrap();
        assert_eq!(find_photo(dir.path(), "Alice"), Some(dir.path().join("Alice.jpg")));
        assert_eq!(find_photo(dir.path(), "Bob"), None);
    }
}
