use crate::attendance::AttendanceWriter;
use crate::config::AppConfig;
use crate::enrollment;
use crate::gallery::Gallery;
use crate::model_store::ModelStore;
use crate::recognizer::{RecognitionEngine, RecognitionSettings, RunOutcome, StatusObserver};
use crate::trainer::{Trainer, TrainingReport};
use anyhow::Context;
use image::GrayImage;
use providers::directory::DirectoryOpener;
use providers::full_frame::FullFrameDetector;
use providers::seeta::{SeetaDetector, SeetaParams};
use providers::{CameraOpener, FaceDetector};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use storage::{connect, migrate};
use tracing::{info, warn};

pub struct EnrollSummary {
    pub class_name: String,
    pub roll_no: String,
    pub stored: usize,
}

pub async fn open_gallery(config: &AppConfig) -> anyhow::Result<Gallery> {
    let pool = connect(&config.database.path).await.context("db connect")?;
    migrate(&pool).await.context("db migrate")?;
    Ok(Gallery::new(pool))
}

pub fn model_store(config: &AppConfig) -> ModelStore {
    ModelStore::new(&config.model.path)
}

/// Capture backend named by `capture.provider`.
pub fn build_camera(config: &AppConfig) -> Box<dyn CameraOpener> {
    match config.capture.provider.as_str() {
        "directory" => Box::new(DirectoryOpener::new(&config.capture.frames_dir)),
        "camera" => native_camera(config),
        other => {
            warn!("unknown capture provider {other:?}, using camera");
            native_camera(config)
        }
    }
}

#[cfg(feature = "camera")]
fn native_camera(config: &AppConfig) -> Box<dyn CameraOpener> {
    Box::new(providers::camera::NativeCameraOpener::new(config.capture.device_index))
}

#[cfg(not(feature = "camera"))]
fn native_camera(config: &AppConfig) -> Box<dyn CameraOpener> {
    warn!(
        "built without camera support, replaying frames from {}",
        config.capture.frames_dir
    );
    Box::new(DirectoryOpener::new(&config.capture.frames_dir))
}

/// Face detector named by `detector.provider`.
pub fn build_detector(config: &AppConfig) -> anyhow::Result<Box<dyn FaceDetector>> {
    let detector: Box<dyn FaceDetector> = match config.detector.provider.as_str() {
        "full_frame" => Box::new(FullFrameDetector),
        "seeta" => seeta(config)?,
        other => {
            warn!("unknown detector provider {other:?}, using seeta");
            seeta(config)?
        }
    };
    Ok(detector)
}

fn seeta(config: &AppConfig) -> anyhow::Result<Box<dyn FaceDetector>> {
    let d = &config.detector;
    let params = SeetaParams {
        min_face_size: d.min_face_size,
        score_thresh: d.score_thresh,
        pyramid_scale: d.pyramid_scale,
        slide_step: d.slide_step,
    };
    let detector = SeetaDetector::from_model(Path::new(&d.model_path), &params)
        .with_context(|| format!("load face detector model {}", d.model_path))?;
    Ok(Box::new(detector))
}

/// Today's attendance column title.
pub fn today(config: &AppConfig) -> String {
    chrono::Local::now()
        .format(&config.workbook.date_format)
        .to_string()
}

pub async fn enroll(
    config: &AppConfig,
    class_name: &str,
    roll_no: &str,
    images: &[GrayImage],
) -> anyhow::Result<EnrollSummary> {
    let gallery = open_gallery(config).await?;
    let stored = gallery.add_samples(class_name, roll_no, images).await?;
    Ok(EnrollSummary {
        class_name: class_name.trim().to_string(),
        roll_no: roll_no.trim().to_string(),
        stored,
    })
}

/// Enrolls image files. With `detect`, each image is cropped to the first
/// face found by the configured detector.
pub async fn enroll_files<P: AsRef<Path>>(
    config: &AppConfig,
    class_name: &str,
    roll_no: &str,
    paths: &[P],
    detect: bool,
) -> anyhow::Result<EnrollSummary> {
    let mut detector = if detect {
        Some(build_detector(config)?)
    } else {
        None
    };
    let detector = detector
        .as_mut()
        .map(|d| -> &mut dyn FaceDetector { d.as_mut() });
    let images = enrollment::load_images(paths, detector).context("load enrollment images")?;
    enroll(config, class_name, roll_no, &images).await
}

pub async fn train(config: &AppConfig) -> anyhow::Result<TrainingReport> {
    let gallery = open_gallery(config).await?;
    let store = model_store(config);
    let model = Trainer::new(&gallery, &store, config.model.lbph_params())
        .train()
        .await?;
    Ok(model.report())
}

/// Runs one recognition session against the configured workbook. Blocks
/// until the loop reaches a terminal state.
pub fn recognize(
    config: &AppConfig,
    opener: Box<dyn CameraOpener>,
    detector: Box<dyn FaceDetector>,
    date: String,
    cancel: Arc<AtomicBool>,
    observer: Box<dyn StatusObserver>,
) -> anyhow::Result<RunOutcome> {
    let settings = RecognitionSettings {
        confidence_threshold: config.recognition.confidence_threshold,
        finish_delay: Duration::from_millis(config.recognition.finish_delay_ms),
        date,
    };
    info!(
        "recognition started (threshold {}, date {})",
        settings.confidence_threshold, settings.date
    );
    let writer = AttendanceWriter::new(&config.workbook);
    let mut engine = RecognitionEngine::new(
        model_store(config),
        opener,
        detector,
        Box::new(writer),
        settings,
    )
    .with_cancel(cancel)
    .with_observer(observer);
    Ok(engine.run()?)
}
