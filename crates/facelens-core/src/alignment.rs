//! Face crops: 5-landmark similarity alignment and square box crops.
//!
//! Both are expressed as a 4-DOF similarity transform (scale, rotation,
//! translation) from image space to crop space, then sampled with bilinear
//! interpolation into an interleaved RGB buffer.

use crate::pixels::PixelBuffer;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// Square RGB crop, interleaved `size × size × 3`.
#[derive(Debug, Clone)]
pub struct Crop {
    pub size: usize,
    pub data: Vec<u8>,
}

impl Crop {
    pub fn rgb(&self, x: usize, y: usize) -> [u8; 3] {
        let i = (y * self.size + x) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Similarity transform `[a, -b, tx, b, a, ty]`:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
type Similarity = [f32; 6];

/// Least-squares similarity transform mapping `src` landmarks onto `dst`.
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Similarity {
    // Normal equations for A * [a, b, tx, ty]^T = B with rows
    //   [sx, -sy, 1, 0] -> dx
    //   [sy,  sx, 0, 1] -> dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];
        for j in 0..4 {
            for k in 0..4 {
                ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb);
    [a, -b, tx, b, a, ty]
}

/// Gaussian elimination with partial pivoting. Degenerate systems yield identity scale.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: [[f32; 4]; 4], atb: [f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| {
                m[r1][col]
                    .abs()
                    .partial_cmp(&m[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    x
}

/// Warp `image` through `matrix` into a `out_size × out_size` RGB crop.
///
/// Out-of-bounds samples are black.
fn warp_affine(image: &PixelBuffer, matrix: &Similarity, out_size: usize) -> Crop {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    let mut data = vec![0u8; out_size * out_size * 3];

    // M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return Crop { size: out_size, data };
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = (image.width() as i64, image.height() as i64);
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.rgb(x as usize, y as usize)[c] as f32
        } else {
            0.0
        }
    };

    for oy in 0..out_size {
        for ox in 0..out_size {
            // src = M^-1 * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            // Also rejects NaN and values too large to index.
            if !(sx > -1.0 && sx < w as f32 && sy > -1.0 && sy < h as f32) {
                continue;
            }

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            for c in 0..3 {
                let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                    + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                    + sample(x0 + 1, y0 + 1, c) * fx * fy;
                data[(oy * out_size + ox) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Crop { size: out_size, data }
}

/// Align a detected face to the canonical 112×112 ArcFace crop.
pub fn align_face(image: &PixelBuffer, landmarks: &[(f32, f32); 5]) -> Crop {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(image, &matrix, ALIGNED_SIZE)
}

/// Axis-aligned square crop of side `side` centred on `center`, resized to `out_size`.
pub fn crop_square(image: &PixelBuffer, center: (f32, f32), side: f32, out_size: usize) -> Crop {
    let scale = if side > 0.0 { out_size as f32 / side } else { 0.0 };
    let half = out_size as f32 / 2.0;
    scale_translate(
        image,
        scale,
        (half - center.0 * scale, half - center.1 * scale),
        out_size,
    )
}

/// Scale `image` by `scale`, shift by `offset` and sample a `out_size × out_size` crop.
pub fn scale_translate(image: &PixelBuffer, scale: f32, offset: (f32, f32), out_size: usize) -> Crop {
    let matrix = [scale, 0.0, offset.0, 0.0, scale, offset.1];
    warp_affine(image, &matrix, out_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(width: u32, height: u32, rgb: [u8; 3]) -> PixelBuffer {
        let raw = rgb.repeat((width * height) as usize);
        PixelBuffer::from_rgb(width, height, raw).unwrap()
    }

    #[test]
    fn test_identity_transform() {
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
        // Source landmarks at 2x scale → a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.01, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_align_face_output_size() {
        let image = uniform(64, 48, [128, 128, 128]);
        let aligned = align_face(&image, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.size, ALIGNED_SIZE);
        assert_eq!(aligned.data.len(), ALIGNED_SIZE * ALIGNED_SIZE * 3);
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the source left eye should land near the reference left eye.
        let (w, h) = (200usize, 200usize);
        let mut raw = vec![0u8; w * h * 3];
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        let (lx, ly) = (src_landmarks[0].0 as usize, src_landmarks[0].1 as usize);
        for y in ly - 2..=ly + 2 {
            for x in lx - 2..=lx + 2 {
                raw[(y * w + x) * 3..(y * w + x) * 3 + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let image = PixelBuffer::from_rgb(w as u32, h as u32, raw).unwrap();
        let aligned = align_face(&image, &src_landmarks);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as usize;
        let max_val = (ref_y - 1..=ref_y + 1)
            .flat_map(|y| (ref_x - 1..=ref_x + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned.rgb(x, y)[0])
            .max()
            .unwrap_or(0);
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn test_crop_square_samples_region() {
        // Left half red, right half blue; crop centred in the right half must be blue.
        let (w, h) = (100usize, 50usize);
        let mut raw = Vec::with_capacity(w * h * 3);
        for _y in 0..h {
            for x in 0..w {
                raw.extend_from_slice(if x < 50 { &[255, 0, 0] } else { &[0, 0, 255] });
            }
        }
        let image = PixelBuffer::from_rgb(w as u32, h as u32, raw).unwrap();
        let crop = crop_square(&image, (75.0, 25.0), 20.0, 16);
        assert_eq!(crop.data.len(), 16 * 16 * 3);
        assert_eq!(crop.rgb(8, 8), [0, 0, 255]);
    }

    #[test]
    fn test_crop_square_pads_outside_black() {
        let image = uniform(10, 10, [200, 200, 200]);
        // Crop much larger than the image: corners fall outside
        let crop = crop_square(&image, (5.0, 5.0), 100.0, 20);
        assert_eq!(crop.rgb(0, 0), [0, 0, 0]);
        assert_eq!(crop.rgb(10, 10), [200, 200, 200]);
    }

    #[test]
    fn test_non_finite_transform_is_black() {
        let image = uniform(8, 8, [200, 200, 200]);
        for offset in [(f32::INFINITY, 0.0), (0.0, f32::NAN), (1e30, 1e30)] {
            let crop = scale_translate(&image, 1.0, offset, 4);
            assert!(crop.data.iter().all(|&v| v == 0), "offset {offset:?}");
        }

        let degenerate = [(f32::NAN, f32::NAN); 5];
        let crop = align_face(&image, &degenerate);
        assert_eq!(crop.size, ALIGNED_SIZE);
        assert!(crop.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_crop_square_zero_side_is_black() {
        let image = uniform(10, 10, [200, 200, 200]);
        let crop = crop_square(&image, (5.0, 5.0), 0.0, 8);
        assert!(crop.data.iter().all(|&v| v == 0));
    }
}
