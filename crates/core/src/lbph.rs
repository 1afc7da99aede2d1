//! Local Binary Patterns Histograms face classifier.
//!
//! Every training face is reduced to a concatenation of per-cell LBP
//! histograms. Prediction is nearest neighbour under the chi-square
//! distance, and that distance is reported as the confidence.

use crate::error::{AttendanceError, Result};
use crate::normalize::{canonical, FaceSize};
use image::GrayImage;
use serde::{Deserialize, Serialize};

const MAX_NEIGHBORS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    pub face_size: FaceSize,
}

impl LbphParams {
    pub fn validate(&self) -> Result<()> {
        if self.radius == 0 {
            return Err(AttendanceError::Classifier("radius must be at least 1".into()));
        }
        if self.neighbors == 0 || self.neighbors > MAX_NEIGHBORS {
            return Err(AttendanceError::Classifier(format!(
                "neighbors must be within 1..={MAX_NEIGHBORS}"
            )));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(AttendanceError::Classifier("grid must be at least 1x1".into()));
        }
        let (w, h) = self.lbp_dimensions();
        if w < self.grid_x || h < self.grid_y {
            return Err(AttendanceError::Classifier(format!(
                "face size {}x{} too small for radius {} and grid {}x{}",
                self.face_size.width, self.face_size.height, self.radius, self.grid_x, self.grid_y
            )));
        }
        Ok(())
    }

    fn patterns(&self) -> usize {
        1usize << self.neighbors
    }

    fn lbp_dimensions(&self) -> (u32, u32) {
        (
            self.face_size.width.saturating_sub(2 * self.radius),
            self.face_size.height.saturating_sub(2 * self.radius),
        )
    }

    pub fn histogram_len(&self) -> usize {
        self.patterns() * (self.grid_x * self.grid_y) as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    params: LbphParams,
    histograms: Vec<Vec<f32>>,
    labels: Vec<u32>,
}

impl LbphModel {
    pub fn new(params: LbphParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            histograms: Vec::new(),
            labels: Vec::new(),
        })
    }

    /// Adds one training face. The face is brought to the canonical size first.
    pub fn add(&mut self, face: &GrayImage, label: u32) {
        let histogram = spatial_histogram(&self.params, face);
        self.histograms.push(histogram);
        self.labels.push(label);
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    pub fn sample_count(&self) -> usize {
        self.labels.len()
    }

    /// Closest training label and its distance.
    pub fn predict(&self, face: &GrayImage) -> Result<(u32, f64)> {
        if self.histograms.is_empty() {
            return Err(AttendanceError::Classifier("model has no training samples".into()));
        }
        let query = spatial_histogram(&self.params, face);
        let mut best = (self.labels[0], f64::MAX);
        for (histogram, label) in self.histograms.iter().zip(&self.labels) {
            let distance = chi_square(histogram, &query);
            if distance < best.1 {
                best = (*label, distance);
            }
        }
        Ok(best)
    }
}

/// Concatenated, per-cell L1-normalised LBP histograms of `face`.
pub fn spatial_histogram(params: &LbphParams, face: &GrayImage) -> Vec<f32> {
    let face = canonical(face, params.face_size);
    let (lbp_w, lbp_h) = params.lbp_dimensions();
    let codes = extended_lbp(&face, params.radius, params.neighbors);

    let patterns = params.patterns();
    let cell_w = lbp_w / params.grid_x;
    let cell_h = lbp_h / params.grid_y;
    let cell_total = (cell_w * cell_h) as f32;

    let mut result = vec![0f32; params.histogram_len()];
    for gy in 0..params.grid_y {
        for gx in 0..params.grid_x {
            let offset = ((gy * params.grid_x + gx) as usize) * patterns;
            let cell = &mut result[offset..offset + patterns];
            for y in gy * cell_h..(gy + 1) * cell_h {
                let row = (y * lbp_w) as usize;
                for x in gx * cell_w..(gx + 1) * cell_w {
                    cell[codes[row + x as usize] as usize] += 1.0;
                }
            }
            for bin in cell.iter_mut() {
                *bin /= cell_total;
            }
        }
    }
    result
}

/// Circular LBP codes with bilinear sampling, row-major over the
/// `(w - 2r) x (h - 2r)` interior of `src`.
fn extended_lbp(src: &GrayImage, radius: u32, neighbors: u32) -> Vec<u32> {
    let (w, h) = src.dimensions();
    let r = radius as i64;
    let out_w = w.saturating_sub(2 * radius) as usize;
    let out_h = h.saturating_sub(2 * radius) as usize;
    let mut dst = vec![0u32; out_w * out_h];
    let pixel = |x: i64, y: i64| src.get_pixel(x as u32, y as u32).0[0] as f64;

    for n in 0..neighbors {
        let angle = 2.0 * std::f64::consts::PI * n as f64 / neighbors as f64;
        // Snap axis-aligned sample points so they read exactly one pixel.
        let sx = snap(radius as f64 * angle.cos());
        let sy = snap(-(radius as f64) * angle.sin());
        let (fx, fy) = (sx.floor() as i64, sy.floor() as i64);
        let (cx, cy) = (sx.ceil() as i64, sy.ceil() as i64);
        let (tx, ty) = (sx - fx as f64, sy - fy as f64);
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in r..(h as i64 - r) {
            for x in r..(w as i64 - r) {
                let t = w1 * pixel(x + fx, y + fy)
                    + w2 * pixel(x + cx, y + fy)
                    + w3 * pixel(x + fx, y + cy)
                    + w4 * pixel(x + cx, y + cy);
                let center = pixel(x, y);
                if t > center || (t - center).abs() < f64::EPSILON {
                    let idx = (y - r) as usize * out_w + (x - r) as usize;
                    dst[idx] |= 1 << n;
                }
            }
        }
    }
    dst
}

fn snap(v: f64) -> f64 {
    if (v - v.round()).abs() < 1e-9 {
        v.round()
    } else {
        v
    }
}

/// Alternative chi-square distance: `sum 2 (a - b)^2 / (a + b)`.
pub fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&a, &b)| {
            let (a, b) = (a as f64, b as f64);
            let denom = a + b;
            if denom.abs() > f64::EPSILON {
                (a - b) * (a - b) / denom
            } else {
                0.0
            }
        })
        .sum();
    2.0 * sum
}
