//! Face normalization: alignment, crop fallback, and pixel normalization.
//!
//! Aligns detected faces to a canonical 112×112 position using the five
//! InsightFace reference landmarks and a 4-DOF similarity transform estimated
//! by least-squares. Faces without landmarks fall back to a margin-expanded
//! crop clipped to the frame. Both paths end in the same tensor layout.

use crate::frame::Frame;
use crate::types::FaceCandidate;
use ndarray::Array4;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const NORMALIZED_SIZE: usize = 112;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5; // symmetric normalization, per ArcFace training
/// Context pixels added around a landmark-less bounding box (total, half per side).
const CONTEXT_MARGIN: f32 = 32.0;

/// A face normalized to the fixed embedding-model input: NCHW 1×3×112×112,
/// RGB channel order, pixel range mapped to roughly [-1, 1].
pub struct NormalizedFace {
    tensor: Array4<f32>,
}

impl NormalizedFace {
    pub(crate) fn from_rgb112(pixels: &[u8]) -> Self {
        let size = NORMALIZED_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                for c in 0..3 {
                    let pixel = pixels.get((y * size + x) * 3 + c).copied().unwrap_or(0) as f32;
                    tensor[[0, c, y, x]] = (pixel - PIXEL_MEAN) / PIXEL_STD;
                }
            }
        }

        Self { tensor }
    }

    pub(crate) fn tensor(&self) -> &Array4<f32> {
        &self.tensor
    }
}

/// Normalize one detected face into the canonical embedding input.
///
/// With landmarks: similarity-align so the eye line is horizontal and the
/// face occupies the canonical region. Without landmarks: expand the box by
/// a fixed margin, clip to the frame bounds, and resize directly. Never
/// fails; out-of-frame regions fill black.
pub fn normalize(frame: &Frame, face: &FaceCandidate) -> NormalizedFace {
    let pixels = match face.landmarks.as_ref() {
        Some(landmarks) => {
            let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
            warp_affine_rgb(frame, &matrix, NORMALIZED_SIZE)
        }
        None => {
            let (x0, y0, w, h) = expand_and_clip(face, frame.width, frame.height);
            crop_resize_rgb(frame, x0, y0, w, h, NORMALIZED_SIZE)
        }
    };

    NormalizedFace::from_rgb112(&pixels)
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> [f32; 6] {
    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4]; // 4x1

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        // Row 1: [sx, -sy, 1, 0] * [a, b, tx, ty]^T = dx
        let r1 = [sx, -sy, 1.0, 0.0];
        // Row 2: [sy, sx, 0, 1] * [a, b, tx, ty]^T = dy
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    // Solve 4x4 system via Gaussian elimination with partial pivoting
    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    // Augmented matrix [A | b] as 4x5
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    // Forward elimination with partial pivoting
    for col in 0..4 {
        // Find pivot
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0]; // fallback: identity-ish
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    // Back substitution
    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Apply a 2×3 affine warp to produce an RGB output image.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with 0 (black).
fn warp_affine_rgb(frame: &Frame, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let src_width = frame.width as i32;
    let src_height = frame.height as i32;

    let (a, _neg_b, tx) = (matrix[0], matrix[1], matrix[2]);
    let (b, _a2, ty) = (matrix[3], matrix[4], matrix[5]);

    // Invert the 2x2 part: M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return vec![0u8; out_size * out_size * 3];
    }
    let inv_det = 1.0 / det;
    let ia = a * inv_det;
    let ib = b * inv_det;

    let mut output = vec![0u8; out_size * out_size * 3];

    for oy in 0..out_size {
        for ox in 0..out_size {
            // Map output pixel back to source: src = M_inv * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            // Bilinear interpolation
            let x0 = sx.floor() as i32;
            let y0 = sy.floor() as i32;
            let x1 = x0 + 1;
            let y1 = y0 + 1;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for c in 0..3 {
                let sample = |x: i32, y: i32| -> f32 {
                    if x >= 0 && x < src_width && y >= 0 && y < src_height {
                        frame.channel_at(x as usize, y as usize, c) as f32
                    } else {
                        0.0
                    }
                };

                let val = sample(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + sample(x1, y0) * fx * (1.0 - fy)
                    + sample(x0, y1) * (1.0 - fx) * fy
                    + sample(x1, y1) * fx * fy;

                output[(oy * out_size + ox) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

/// Expand a bounding box by the context margin and clip it to the frame.
///
/// The result always covers at least one pixel, even for boxes that sit
/// partly or fully outside the frame.
fn expand_and_clip(face: &FaceCandidate, frame_w: u32, frame_h: u32) -> (usize, usize, usize, usize) {
    let half = CONTEXT_MARGIN / 2.0;

    let x0 = (face.x - half).max(0.0).min(frame_w as f32 - 1.0);
    let y0 = (face.y - half).max(0.0).min(frame_h as f32 - 1.0);
    let x1 = (face.x + face.width + half).clamp(x0 + 1.0, frame_w as f32);
    let y1 = (face.y + face.height + half).clamp(y0 + 1.0, frame_h as f32);

    (
        x0 as usize,
        y0 as usize,
        (x1 - x0) as usize,
        (y1 - y0) as usize,
    )
}

/// Bilinear-resize a crop region of the frame to `out_size` × `out_size` RGB.
///
/// The crop is stretched directly (no aspect preservation); samples clamp to
/// the frame edges.
fn crop_resize_rgb(
    frame: &Frame,
    x0: usize,
    y0: usize,
    crop_w: usize,
    crop_h: usize,
    out_size: usize,
) -> Vec<u8> {
    let max_x = frame.width as usize - 1;
    let max_y = frame.height as usize - 1;

    let sx = crop_w as f32 / out_size as f32;
    let sy = crop_h as f32 / out_size as f32;

    let mut output = vec![0u8; out_size * out_size * 3];

    for oy in 0..out_size {
        let src_y = y0 as f32 + (oy as f32 + 0.5) * sy - 0.5;
        let ya = (src_y.floor() as i32).clamp(0, max_y as i32) as usize;
        let yb = (ya + 1).min(max_y);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for ox in 0..out_size {
            let src_x = x0 as f32 + (ox as f32 + 0.5) * sx - 0.5;
            let xa = (src_x.floor() as i32).clamp(0, max_x as i32) as usize;
            let xb = (xa + 1).min(max_x);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = frame.channel_at(xa, ya, c) as f32;
                let tr = frame.channel_at(xb, ya, c) as f32;
                let bl = frame.channel_at(xa, yb, c) as f32;
                let br = frame.channel_at(xb, yb, c) as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                output[(oy * out_size + ox) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(w: u32, h: u32, value: u8) -> Frame {
        Frame::new(vec![value; w as usize * h as usize * 3], w, h).unwrap()
    }

    fn face_at(x: f32, y: f32, w: f32, h: f32) -> FaceCandidate {
        FaceCandidate {
            x, y, width: w, height: h, confidence: 0.9, landmarks: None,
        }
    }

    #[test]
    fn test_identity_transform() {
        // When src == dst, transform should be identity-like (a≈1, b≈0)
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → transform should have a ≈ 0.5
        let src: [(f32, f32); 5] = [
            (76.5892, 103.3926),
            (147.0636, 103.0028),
            (112.0504, 143.4732),
            (83.0986, 184.7310),
            (141.4598, 184.4082),
        ];
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);

        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_warp_output_size() {
        let frame = gray_frame(640, 480, 128);
        let m = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]; // identity
        let out = warp_affine_rgb(&frame, &m, 112);
        assert_eq!(out.len(), 112 * 112 * 3);
    }

    #[test]
    fn test_landmark_roundtrip() {
        // Place a bright patch at a landmark position, verify it lands near the
        // reference position after alignment.
        let w = 200u32;
        let h = 200u32;
        let mut data = vec![0u8; w as usize * h as usize * 3];

        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // Paint a 5x5 bright patch at the left eye position (survives bilinear interpolation)
        let lx = src_landmarks[0].0 as usize;
        let ly = src_landmarks[0].1 as usize;
        for dy in 0..5 {
            for dx in 0..5 {
                let px = lx.wrapping_sub(2) + dx;
                let py = ly.wrapping_sub(2) + dy;
                if px < w as usize && py < h as usize {
                    let base = (py * w as usize + px) * 3;
                    data[base] = 255;
                    data[base + 1] = 255;
                    data[base + 2] = 255;
                }
            }
        }

        let frame = Frame::new(data, w, h).unwrap();
        let matrix = estimate_similarity_transform(&src_landmarks, &REFERENCE_LANDMARKS_112);
        let aligned = warp_affine_rgb(&frame, &matrix, 112);

        // The reference left eye position is (38.29, 51.70).
        // Sample a small area around it and check for non-zero brightness.
        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as usize;

        let mut max_val = 0u8;
        for dy in 0..3 {
            for dx in 0..3 {
                let x = ref_x.wrapping_sub(1) + dx;
                let y = ref_y.wrapping_sub(1) + dy;
                if x < 112 && y < 112 {
                    max_val = max_val.max(aligned[(y * 112 + x) * 3]);
                }
            }
        }
        assert!(max_val > 100, "Expected bright patch near reference left eye ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn test_expand_and_clip_interior_box() {
        let face = face_at(100.0, 100.0, 50.0, 50.0);
        let (x0, y0, w, h) = expand_and_clip(&face, 640, 480);
        assert_eq!((x0, y0), (84, 84));
        assert_eq!((w, h), (82, 82));
    }

    #[test]
    fn test_expand_and_clip_at_origin() {
        // Margin expansion past the top-left corner clips to (0, 0).
        let face = face_at(5.0, 5.0, 50.0, 50.0);
        let (x0, y0, w, h) = expand_and_clip(&face, 640, 480);
        assert_eq!((x0, y0), (0, 0));
        assert_eq!((w, h), (71, 71));
    }

    #[test]
    fn test_expand_and_clip_past_frame_edge() {
        let face = face_at(600.0, 440.0, 50.0, 50.0);
        let (x0, y0, w, h) = expand_and_clip(&face, 640, 480);
        assert_eq!((x0, y0), (584, 424));
        assert_eq!((x0 + w, y0 + h), (640, 480));
    }

    #[test]
    fn test_expand_and_clip_degenerate_box_still_covers_a_pixel() {
        let face = face_at(2000.0, 2000.0, 10.0, 10.0);
        let (x0, y0, w, h) = expand_and_clip(&face, 640, 480);
        assert!(w >= 1 && h >= 1);
        assert!(x0 + w <= 640 && y0 + h <= 480);
    }

    #[test]
    fn test_crop_resize_uniform() {
        let frame = gray_frame(64, 64, 200);
        let out = crop_resize_rgb(&frame, 10, 10, 30, 30, 112);
        assert_eq!(out.len(), 112 * 112 * 3);
        assert!(out.iter().all(|&p| p == 200));
    }

    #[test]
    fn test_normalize_without_landmarks_uses_crop_path() {
        let frame = gray_frame(64, 64, 128);
        let face = face_at(10.0, 10.0, 30.0, 30.0);
        let normalized = normalize(&frame, &face);
        assert_eq!(normalized.tensor().shape(), &[1, 3, 112, 112]);

        // 128 normalizes to (128 - 127.5) / 127.5
        let expected = (128.0 - PIXEL_MEAN) / PIXEL_STD;
        let val = normalized.tensor()[[0, 0, 56, 56]];
        assert!((val - expected).abs() < 1e-6, "got {val}, expected {expected}");
    }

    #[test]
    fn test_from_rgb112_channel_order() {
        // A pure-red pixel must land in channel 0 only.
        let mut pixels = vec![0u8; NORMALIZED_SIZE * NORMALIZED_SIZE * 3];
        pixels[0] = 255;
        let normalized = NormalizedFace::from_rgb112(&pixels);

        let r = normalized.tensor()[[0, 0, 0, 0]];
        let g = normalized.tensor()[[0, 1, 0, 0]];
        let black = (0.0 - PIXEL_MEAN) / PIXEL_STD;
        assert!((r - 1.0).abs() < 1e-4);
        assert!((g - black).abs() < 1e-6);
    }
}
