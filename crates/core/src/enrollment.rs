//! Collecting face crops for enrollment, either from a capture burst or
//! from image files.

use crate::error::{AttendanceError, Result};
use crate::normalize::{crop_region, to_gray};
use image::GrayImage;
use providers::{CameraOpener, FaceDetector};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Reads frames until `count` faces are collected, `max_frames` frames were
/// read, the stream ends or `cancel` is set. Keeps the first face of each frame.
pub fn capture_samples(
    opener: &dyn CameraOpener,
    detector: &mut dyn FaceDetector,
    count: usize,
    max_frames: usize,
    cancel: &AtomicBool,
) -> Result<Vec<GrayImage>> {
    let mut source = opener
        .open()
        .map_err(|e| AttendanceError::DeviceUnavailable(e.to_string()))?;

    let mut faces = Vec::with_capacity(count);
    let mut frames = 0;
    while faces.len() < count && frames < max_frames {
        if cancel.load(Ordering::SeqCst) {
            info!("capture cancelled after {} face(s)", faces.len());
            break;
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("frame read failed, ending capture: {e}");
                break;
            }
        };
        frames += 1;

        let gray = to_gray(&frame);
        let regions = match detector.detect(&gray) {
            Ok(regions) => regions,
            Err(e) => {
                warn!("detector failed on frame {frames}: {e}");
                continue;
            }
        };
        if let Some(face) = regions.first().and_then(|r| crop_region(&gray, r)) {
            faces.push(face);
        }
    }
    debug!("captured {} face(s) from {} frame(s)", faces.len(), frames);
    Ok(faces)
}

/// Loads enrollment images from disk as grayscale. With a detector, each
/// file contributes its first face crop and files without one are skipped.
pub fn load_images<P: AsRef<Path>>(
    paths: &[P],
    mut detector: Option<&mut dyn FaceDetector>,
) -> Result<Vec<GrayImage>> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let gray = to_gray(&image::open(path)?);
        let Some(detector) = detector.as_deref_mut() else {
            images.push(gray);
            continue;
        };
        let regions = detector.detect(&gray)?;
        match regions.first().and_then(|r| crop_region(&gray, r)) {
            Some(face) => images.push(face),
            None => warn!("no face found in {}, skipped", path.display()),
        }
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Luma};
    use providers::directory::DirectoryOpener;
    use providers::full_frame::FullFrameDetector;
    use providers::{FaceRegion, FrameSource, ProviderError};

    struct CenterDetector;

    impl FaceDetector for CenterDetector {
        fn detect(&mut self, frame: &GrayImage) -> std::result::Result<Vec<FaceRegion>, ProviderError> {
            if frame.get_pixel(0, 0).0[0] == 0 {
                return Ok(vec![]);
            }
            Ok(vec![
                FaceRegion::new(2, 2, 4, 4),
                FaceRegion::new(0, 0, 8, 8),
            ])
        }
    }

    fn write_frames(dir: &Path, shades: &[u8]) {
        for (i, shade) in shades.iter().enumerate() {
            GrayImage::from_pixel(8, 8, Luma([*shade]))
                .save(dir.join(format!("frame_{i:03}.png")))
                .unwrap();
        }
    }

    #[test]
    fn burst_stops_at_requested_count() {
        let temp = tempfile::tempdir().unwrap();
        write_frames(temp.path(), &[10, 0, 20, 30, 40]);
        let opener = DirectoryOpener::new(temp.path());
        let cancel = AtomicBool::new(false);

        let faces = capture_samples(&opener, &mut CenterDetector, 2, 100, &cancel).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].dimensions(), (4, 4));
        assert_eq!(faces[1].get_pixel(0, 0).0[0], 20);
    }

    #[test]
    fn burst_respects_frame_budget_and_end_of_stream() {
        let temp = tempfile::tempdir().unwrap();
        write_frames(temp.path(), &[10, 20, 30]);
        let opener = DirectoryOpener::new(temp.path());
        let cancel = AtomicBool::new(false);

        let limited = capture_samples(&opener, &mut CenterDetector, 10, 2, &cancel).unwrap();
        assert_eq!(limited.len(), 2);
        let drained = capture_samples(&opener, &mut CenterDetector, 10, 100, &cancel).unwrap();
        assert_eq!(drained.len(), 3);
    }

    #[test]
    fn cancelled_burst_reads_nothing() {
        let temp = tempfile::tempdir().unwrap();
        write_frames(temp.path(), &[10, 20]);
        let cancel = AtomicBool::new(true);
        let faces =
            capture_samples(&DirectoryOpener::new(temp.path()), &mut CenterDetector, 5, 5, &cancel).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn unavailable_device_is_reported() {
        struct Broken;
        impl CameraOpener for Broken {
            fn open(&self) -> std::result::Result<Box<dyn FrameSource>, ProviderError> {
                Err(ProviderError::Capture("busy".into()))
            }
        }
        let cancel = AtomicBool::new(false);
        let err = capture_samples(&Broken, &mut FullFrameDetector, 1, 1, &cancel).unwrap_err();
        assert!(matches!(err, AttendanceError::DeviceUnavailable(_)));
    }

    #[test]
    fn files_without_a_face_are_skipped_when_detecting() {
        let temp = tempfile::tempdir().unwrap();
        write_frames(temp.path(), &[0, 50]);
        let paths = vec![temp.path().join("frame_000.png"), temp.path().join("frame_001.png")];

        let plain = load_images(&paths, None).unwrap();
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[0].dimensions(), (8, 8));

        let mut detector = CenterDetector;
        let detected = load_images(&paths, Some(&mut detector)).unwrap();
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].dimensions(), (4, 4));
    }

    #[test]
    fn color_files_are_converted_to_gray() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("color.png");
        DynamicImage::new_rgb8(5, 3).save(&path).unwrap();
        let images = load_images(&[path], None).unwrap();
        assert_eq!(images[0].dimensions(), (5, 3));
    }
}
