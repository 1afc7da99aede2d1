//! Device and detector abstractions for the capture pipeline.
//!
//! A [`CameraOpener`] hands out an exclusively owned [`FrameSource`]; the
//! source is released when it is dropped. A [`FaceDetector`] finds face
//! regions in grayscale frames.

use image::{DynamicImage, GrayImage};
use serde::Serialize;
use thiserror::Error;

#[cfg(feature = "camera")]
pub mod camera;
pub mod directory;
pub mod full_frame;
pub mod seeta;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("frame capture failed: {0}")]
    Capture(String),
    #[error("face detector failed: {0}")]
    Detector(String),
}

/// Axis-aligned face rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub score: f32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score: 1.0,
        }
    }
}

/// A stream of frames from an opened device.
pub trait FrameSource {
    /// Blocks until the next frame is available. `Ok(None)` signals end of stream.
    fn next_frame(&mut self) -> Result<Option<DynamicImage>, ProviderError>;
}

/// Acquires a capture device. Each call yields a fresh, exclusively owned source.
pub trait CameraOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, ProviderError>;
}

pub trait FaceDetector {
    /// Face regions found in `frame`, in detector order.
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceRegion>, ProviderError>;
}
