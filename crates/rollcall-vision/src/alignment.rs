//! Face alignment via a 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference layout
//! and resamples the face into a 112×112 RGB crop.

use image::{Rgb, RgbImage};

/// Side length of the aligned crop expected by ArcFace.
pub const ALIGNED_SIZE: u32 = 112;

/// ArcFace reference landmarks for a 112×112 output.
pub const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// `p' = [[a, -b], [b, a]] · p + (tx, ty)`: uniform scale, rotation, translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares similarity taking `src` onto `dst` (closed form on
    /// centred points). `None` when the source points all coincide.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (msx, msy) = mean(src);
        let (mdx, mdy) = mean(dst);

        let mut num_a = 0.0f32;
        let mut num_b = 0.0f32;
        let mut denom = 0.0f32;
        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let (sx, sy) = (sx - msx, sy - msy);
            let (dx, dy) = (dx - mdx, dy - mdy);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            denom += sx * sx + sy * sy;
        }
        if denom < 1e-12 {
            return None;
        }

        let a = num_a / denom;
        let b = num_b / denom;
        Some(Self {
            a,
            b,
            tx: mdx - (a * msx - b * msy),
            ty: mdy - (b * msx + a * msy),
        })
    }

    pub fn scale(&self) -> f32 {
        self.a.hypot(self.b)
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse mapping, used to pull source pixels for each output pixel.
    pub fn invert(&self, (u, v): (f32, f32)) -> (f32, f32) {
        let det = self.a * self.a + self.b * self.b;
        let (du, dv) = (u - self.tx, v - self.ty);
        (
            (self.a * du + self.b * dv) / det,
            (-self.b * du + self.a * dv) / det,
        )
    }
}

/// Bilinear RGB sample; outside the image reads as black.
fn sample(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi >= 0 && xi < w && yi >= 0 && yi < h {
            let Rgb(c) = *image.get_pixel(xi as u32, yi as u32);
            [c[0] as f32, c[1] as f32, c[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    std::array::from_fn(|c| {
        tl[c] * (1.0 - fx) * (1.0 - fy) + tr[c] * fx * (1.0 - fy) + bl[c] * (1.0 - fx) * fy + br[c] * fx * fy
    })
}

/// Warp `image` through `transform` into a `size`×`size` crop.
pub fn warp(image: &RgbImage, transform: &Similarity, size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |ox, oy| {
        let (sx, sy) = transform.invert((ox as f32, oy as f32));
        let rgb = sample(image, sx, sy);
        Rgb(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8))
    })
}

/// Align a detected face to the canonical 112×112 ArcFace crop.
///
/// Degenerate landmarks fall back to a plain resize of the whole image.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    match Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112) {
        Some(t) => warp(image, &t, ALIGNED_SIZE),
        None => {
            tracing::debug!("degenerate landmarks; resizing instead of aligning");
            image::imageops::resize(
                image,
                ALIGNED_SIZE,
                ALIGNED_SIZE,
                image::imageops::FilterType::Triangle,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_identity_estimate() {
        let t = Similarity::estimate(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112).unwrap();
        assert!(close(t.a, 1.0, 1e-4), "a = {}", t.a);
        assert!(close(t.b, 0.0, 1e-4), "b = {}", t.b);
        assert!(close(t.tx, 0.0, 1e-3), "tx = {}", t.tx);
        assert!(close(t.ty, 0.0, 1e-3), "ty = {}", t.ty);
    }

    #[test]
    fn test_double_size_source_halves_scale() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!(close(t.scale(), 0.5, 1e-4), "scale = {}", t.scale());
        for (s, d) in src.iter().zip(REFERENCE_LANDMARKS_112.iter()) {
            let (x, y) = t.apply(*s);
            assert!(close(x, d.0, 1e-2) && close(y, d.1, 1e-2));
        }
    }

    #[test]
    fn test_recovers_rotation_and_translation() {
        // Rotate the reference layout by 90° and shift it.
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (-y + 300.0, x + 20.0));
        let t = Similarity::estimate(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!(close(t.scale(), 1.0, 1e-4));
        for (s, d) in src.iter().zip(REFERENCE_LANDMARKS_112.iter()) {
            let (x, y) = t.apply(*s);
            assert!(close(x, d.0, 1e-2) && close(y, d.1, 1e-2), "({x}, {y}) vs {d:?}");
        }
        let back = t.invert(t.apply((12.0, 34.0)));
        assert!(close(back.0, 12.0, 1e-3) && close(back.1, 34.0, 1e-3));
    }

    #[test]
    fn test_degenerate_landmarks() {
        assert!(Similarity::estimate(&[(5.0, 5.0); 5], &REFERENCE_LANDMARKS_112).is_none());
        let img = RgbImage::from_pixel(50, 40, Rgb([10, 20, 30]));
        let aligned = align_face(&img, &[(5.0, 5.0); 5]);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
    }

    #[test]
    fn test_align_output_size() {
        let img = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let aligned = align_face(&img, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.dimensions(), (ALIGNED_SIZE, ALIGNED_SIZE));
        assert_eq!(*aligned.get_pixel(56, 56), Rgb([128, 128, 128]));
    }

    #[test]
    fn test_landmark_patch_lands_on_reference() {
        let mut img = RgbImage::new(200, 200);
        let src: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for y in 58..63 {
            for x in 78..83 {
                img.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }

        let aligned = align_face(&img, &src);

        let (rx, ry) = REFERENCE_LANDMARKS_112[0];
        let (rx, ry) = (rx.round() as u32, ry.round() as u32);
        let brightest = (ry - 1..=ry + 1)
            .flat_map(|y| (rx - 1..=rx + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.get_pixel(x, y)[0])
            .max()
            .unwrap();
        assert!(brightest > 100, "left eye patch not near reference, max red = {brightest}");
    }
}
