use crate::lbph::LbphParams;
use crate::normalize::FaceSize;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub capture: CaptureConfig,
    pub detector: DetectorConfig,
    pub recognition: RecognitionConfig,
    pub workbook: WorkbookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/gallery.db".to_string(),
        }
    }
}

/// Canonical face size and LBPH parameters. Changing any of these requires retraining.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    pub face_width: u32,
    pub face_height: u32,
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "data/model.bin".to_string(),
            face_width: 200,
            face_height: 200,
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

impl ModelConfig {
    pub fn face_size(&self) -> FaceSize {
        FaceSize::new(self.face_width, self.face_height)
    }

    pub fn lbph_params(&self) -> LbphParams {
        LbphParams {
            radius: self.radius,
            neighbors: self.neighbors,
            grid_x: self.grid_x,
            grid_y: self.grid_y,
            face_size: self.face_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// "camera" or "directory"
    pub provider: String,
    pub device_index: u32,
    pub frames_dir: String,
    pub samples_per_session: usize,
    pub max_capture_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            provider: "camera".to_string(),
            device_index: 0,
            frames_dir: "frames".to_string(),
            samples_per_session: 20,
            max_capture_frames: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// "seeta" or "full_frame"
    pub provider: String,
    pub model_path: String,
    pub min_face_size: u32,
    pub score_thresh: f64,
    pub pyramid_scale: f32,
    pub slide_step: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            provider: "seeta".to_string(),
            model_path: "models/seeta_fd_frontal_v1.0.bin".to_string(),
            min_face_size: 40,
            score_thresh: 2.0,
            pyramid_scale: 0.8,
            slide_step: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Distance below which a prediction is accepted. Lower is stricter.
    pub confidence_threshold: f64,
    pub finish_delay_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 100.0,
            finish_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbookConfig {
    pub path: String,
    pub roll_column: String,
    pub present_marker: String,
    pub date_format: String,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            path: "data/attendance.xlsx".to_string(),
            roll_column: "Roll No.".to_string(),
            present_marker: "P".to_string(),
            date_format: "%d-%m-%Y".to_string(),
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("EDUATTEND")
            .prefix_separator("__")
            .separator("__"),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
