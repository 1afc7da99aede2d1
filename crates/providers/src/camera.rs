// thin wrapper around nokhwa for native webcams
use crate::{CameraOpener, FrameSource, ProviderError};
use image::DynamicImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

#[derive(Debug, Clone)]
pub struct NativeCameraOpener {
    index: u32,
}

impl NativeCameraOpener {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

impl CameraOpener for NativeCameraOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, ProviderError> {
        let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(self.index), format)
            .map_err(|e| ProviderError::DeviceUnavailable(e.to_string()))?;
        camera
            .open_stream()
            .map_err(|e| ProviderError::DeviceUnavailable(e.to_string()))?;
        tracing::info!("camera {} opened ({})", self.index, camera.camera_format());
        Ok(Box::new(NativeCamera {
            index: self.index,
            camera,
        }))
    }
}

struct NativeCamera {
    index: u32,
    camera: Camera,
}

impl FrameSource for NativeCamera {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>, ProviderError> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| ProviderError::Capture(e.to_string()))?;
        let rgb = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| ProviderError::Capture(e.to_string()))?;
        Ok(Some(DynamicImage::ImageRgb8(rgb)))
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        match self.camera.stop_stream() {
            Ok(()) => tracing::info!("camera {} released", self.index),
            Err(e) => tracing::warn!("camera {} release failed: {}", self.index, e),
        }
    }
}
