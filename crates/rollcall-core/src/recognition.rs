//! Live recognition: sample frames until one matches or the operator stops.

use crate::gallery::{EmbedError, EmbeddingGallery, FaceEmbedder};
use crate::matcher::{MatchOutcome, Matcher};
use image::RgbImage;

/// A camera or any other producer of frames. `None` is end-of-stream,
/// including a failed read.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<RgbImage>;
}

impl FrameSource for std::vec::IntoIter<RgbImage> {
    fn next_frame(&mut self) -> Option<RgbImage> {
        self.next()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    /// First match found, or the closest miss seen before stopping.
    pub outcome: MatchOutcome,
    pub frames_examined: usize,
}

/// Pull frames from `source` until a face in one of them matches the
/// gallery, the source runs dry, or `should_stop` returns true.
///
/// Faces within a frame are tried in detector order. An empty gallery can
/// never match, so it returns `Unknown` without touching the source.
pub fn recognize_until_match<S, E, M>(
    source: &mut S,
    embedder: &mut E,
    gallery: &EmbeddingGallery,
    matcher: &M,
    tolerance: f32,
    mut should_stop: impl FnMut() -> bool,
) -> Result<Recognition, EmbedError>
where
    S: FrameSource + ?Sized,
    E: FaceEmbedder + ?Sized,
    M: Matcher + ?Sized,
{
    let mut closest = MatchOutcome::Unknown {
        best_distance: None,
    };
    let mut frames_examined = 0usize;

    if gallery.is_empty() {
        tracing::warn!("gallery is empty; nothing to recognize against");
        return Ok(Recognition {
            outcome: closest,
            frames_examined,
        });
    }

    loop {
        if should_stop() {
            tracing::info!(frames_examined, "recognition cancelled");
            break;
        }
        let Some(frame) = source.next_frame() else {
            tracing::info!(frames_examined, "frame source ended");
            break;
        };
        frames_examined += 1;

        for probe in embedder.detect_and_embed(&frame)? {
            match gallery.best_match(&probe, matcher, tolerance) {
                MatchOutcome::Matched { name, distance } => {
                    tracing::info!(name = %name, distance, frames_examined, "face recognized");
                    return Ok(Recognition {
                        outcome: MatchOutcome::Matched { name, distance },
                        frames_examined,
                    });
                }
                MatchOutcome::Unknown { best_distance } => {
                    if is_closer(best_distance, &closest) {
                        closest = MatchOutcome::Unknown { best_distance };
                    }
                }
            }
        }
    }

    Ok(Recognition {
        outcome: closest,
        frames_examined,
    })
}

fn is_closer(candidate: Option<f32>, current: &MatchOutcome) -> bool {
    match (candidate, current) {
        (Some(c), MatchOutcome::Unknown { best_distance: Some(d) }) => c < *d,
        (Some(_), _) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::tests::{pixel_embedding, solid, PixelEmbedder};
    use crate::matcher::EuclideanMatcher;

    fn gallery() -> EmbeddingGallery {
        let mut g = EmbeddingGallery::new();
        g.put("Alice", pixel_embedding([255, 0, 0]));
        g.put("Bob", pixel_embedding([0, 0, 255]));
        g
    }

    #[test]
    fn test_stops_at_first_matching_frame() {
        let frames = vec![solid([0, 0, 0]), solid([0, 250, 0]), solid([0, 0, 255]), solid([255, 0, 0])];
        let mut source = frames.into_iter();
        let mut embedder = PixelEmbedder::default();

        let result =
            recognize_until_match(&mut source, &mut embedder, &gallery(), &EuclideanMatcher, 0.6, || false)
                .unwrap();

        assert_eq!(result.outcome.name(), Some("Bob"));
        assert_eq!(result.frames_examined, 3);
        // The fourth frame was never pulled.
        assert_eq!(source.len(), 1);
    }

    #[test]
    fn test_end_of_stream_is_unknown_with_closest_distance() {
        let mut source = vec![solid([0, 0, 0]), solid([0, 255, 0])].into_iter();
        let mut embedder = PixelEmbedder::default();

        let result =
            recognize_until_match(&mut source, &mut embedder, &gallery(), &EuclideanMatcher, 0.6, || false)
                .unwrap();

        assert!(!result.outcome.is_match());
        assert_eq!(result.frames_examined, 2);
        let MatchOutcome::Unknown { best_distance: Some(d) } = result.outcome else {
            panic!("expected a closest distance");
        };
        assert!((d - 2f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn test_cancel_before_any_frame() {
        let mut source = vec![solid([255, 0, 0])].into_iter();
        let mut embedder = PixelEmbedder::default();

        let result =
            recognize_until_match(&mut source, &mut embedder, &gallery(), &EuclideanMatcher, 0.6, || true)
                .unwrap();

        assert_eq!(result.frames_examined, 0);
        assert_eq!(embedder.calls, 0);
        assert!(!result.outcome.is_match());
    }

    #[test]
    fn test_cancel_after_budget() {
        let mut source = vec![solid([0, 0, 0]); 10].into_iter();
        let mut embedder = PixelEmbedder::default();
        let mut polls = 0;

        let result = recognize_until_match(
            &mut source,
            &mut embedder,
            &gallery(),
            &EuclideanMatcher,
            0.6,
            || {
                polls += 1;
                polls > 3
            },
        )
        .unwrap();

        assert_eq!(result.frames_examined, 3);
    }

    #[test]
    fn test_empty_gallery_returns_unknown_immediately() {
        let mut source = vec![solid([255, 0, 0])].into_iter();
        let mut embedder = PixelEmbedder::default();

        let result = recognize_until_match(
            &mut source,
            &mut embedder,
            &EmbeddingGallery::new(),
            &EuclideanMatcher,
            0.6,
            || false,
        )
        .unwrap();

        assert_eq!(result.outcome, MatchOutcome::Unknown { best_distance: None });
        assert_eq!(source.len(), 1);
    }
}
