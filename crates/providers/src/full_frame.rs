use crate::{FaceDetector, FaceRegion, ProviderError};
use image::GrayImage;

/// Treats every non-empty frame as one face filling the whole image.
///
/// Useful when the frames are already face crops (replayed enrollment shots).
#[derive(Debug, Default)]
pub struct FullFrameDetector;

impl FaceDetector for FullFrameDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, ProviderError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![FaceRegion::new(0, 0, frame.width(), frame.height())])
    }
}
