//! Landmark alignment for the recognizer.
//!
//! Fits a similarity transform (uniform scale, rotation, translation) from the
//! five detected landmarks to the InsightFace reference layout and resamples
//! the face into a 112×112 crop.

/// InsightFace reference landmarks for a 112×112 crop.
pub const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// `(x, y) -> (a*x - b*y + tx, b*x + a*y + ty)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` onto `dst`.
    ///
    /// Returns `None` when the source points are degenerate (all coincident).
    pub fn fit(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let n = src.len() as f32;
        let mean = |pts: &[(f32, f32); 5]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
            (sx / n, sy / n)
        };
        let (sx, sy) = mean(src);
        let (dx, dy) = mean(dst);

        let mut spread = 0.0f32;
        let mut dot = 0.0f32;
        let mut cross = 0.0f32;
        for (&(px, py), &(qx, qy)) in src.iter().zip(dst.iter()) {
            let (ux, uy) = (px - sx, py - sy);
            let (vx, vy) = (qx - dx, qy - dy);
            spread += ux * ux + uy * uy;
            dot += ux * vx + uy * vy;
            cross += ux * vy - uy * vx;
        }
        if spread < 1e-9 {
            return None;
        }

        let a = dot / spread;
        let b = cross / spread;
        Some(Self {
            a,
            b,
            tx: dx - (a * sx - b * sy),
            ty: dy - (b * sx + a * sy),
        })
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample of a grayscale buffer; outside pixels read as `fill`.
pub(crate) fn sample_bilinear(data: &[u8], width: usize, height: usize, x: f32, y: f32, fill: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let px = |xi: i64, yi: i64| -> f32 {
        if xi >= 0 && yi >= 0 && (xi as usize) < width && (yi as usize) < height {
            data[yi as usize * width + xi as usize] as f32
        } else {
            fill
        }
    };

    let top = px(x0, y0) * (1.0 - fx) + px(x0 + 1, y0) * fx;
    let bottom = px(x0, y0 + 1) * (1.0 - fx) + px(x0 + 1, y0 + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Warp the face described by `landmarks` into a 112×112 grayscale crop.
pub fn align_face(frame: &[u8], width: u32, height: u32, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let mut crop = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
    let Some(to_frame) = Similarity::fit(landmarks, &REFERENCE_LANDMARKS).and_then(|t| t.inverse())
    else {
        return crop;
    };

    let (w, h) = (width as usize, height as usize);
    for (i, out) in crop.iter_mut().enumerate() {
        let (cx, cy) = ((i % ALIGNED_SIZE) as f32, (i / ALIGNED_SIZE) as f32);
        let (sx, sy) = to_frame.apply(cx, cy);
        *out = sample_bilinear(frame, w, h, sx, sy, 0.0).round().clamp(0.0, 255.0) as u8;
    }
    crop
}
