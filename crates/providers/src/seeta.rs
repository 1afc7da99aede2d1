//! SeetaFace frontal face detector backed by `rustface`.

use crate::{FaceDetector, FaceRegion, ProviderError};
use image::GrayImage;
use rustface::ImageData;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SeetaParams {
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale: f32,
    pub slide_step: u32,
}

impl Default for SeetaParams {
    fn default() -> Self {
        Self {
            min_face_size: 40,
            score_thresh: 2.0,
            pyramid_scale: 0.8,
            slide_step: 4,
        }
    }
}

pub struct SeetaDetector {
    inner: Box<dyn rustface::Detector>,
}

impl SeetaDetector {
    pub fn from_model(path: &Path, params: &SeetaParams) -> Result<Self, ProviderError> {
        let model_path = path.to_str().ok_or_else(|| {
            ProviderError::Detector(format!("non-utf8 model path {}", path.display()))
        })?;
        let mut inner = rustface::create_detector(model_path).map_err(|e| {
            ProviderError::Detector(format!("loading {}: {}", path.display(), e))
        })?;
        inner.set_min_face_size(params.min_face_size);
        inner.set_score_thresh(params.score_thresh);
        inner.set_pyramid_scale_factor(params.pyramid_scale);
        inner.set_slide_window_step(params.slide_step, params.slide_step);
        Ok(Self { inner })
    }
}

impl FaceDetector for SeetaDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, ProviderError> {
        let mut data = ImageData::new(frame.as_raw(), frame.width(), frame.height());
        let faces = self.inner.detect(&mut data);
        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                let (x, width) = clip_leading(bbox.x(), bbox.width());
                let (y, height) = clip_leading(bbox.y(), bbox.height());
                FaceRegion {
                    x,
                    y,
                    width,
                    height,
                    score: face.score() as f32,
                }
            })
            .collect())
    }
}

/// Boxes near the border can start at negative offsets; drop the part outside the frame.
fn clip_leading(start: i32, len: u32) -> (u32, u32) {
    if start < 0 {
        (0, len.saturating_sub(start.unsigned_abs()))
    } else {
        (start as u32, len)
    }
}
