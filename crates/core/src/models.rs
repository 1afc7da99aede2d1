use crate::error::{AttendanceError, Result};
use crate::labels::IdentityLabelMap;
use crate::lbph::LbphModel;
use chrono::{DateTime, Utc};
use image::GrayImage;
use providers::FaceRegion;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between class name and roll number in an identity key.
pub const KEY_SEPARATOR: char = '-';

/// (class_name, roll_no) pair identifying one enrolled student.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub class_name: String,
    pub roll_no: String,
}

impl IdentityKey {
    pub fn new(class_name: impl Into<String>, roll_no: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            roll_no: roll_no.into(),
        }
    }

    /// Decodes `"{class_name}-{roll_no}"`. Class names may contain the
    /// separator, roll numbers may not.
    pub fn parse(key: &str) -> Result<Self> {
        match key.rsplit_once(KEY_SEPARATOR) {
            Some((class_name, roll_no)) if !class_name.is_empty() && !roll_no.is_empty() => {
                Ok(Self::new(class_name, roll_no))
            }
            _ => Err(AttendanceError::LabelFormat(key.to_string())),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.class_name, KEY_SEPARATOR, self.roll_no)
    }
}

#[derive(Debug, Clone)]
pub struct FaceSample {
    pub class_name: String,
    pub roll_no: String,
    pub pixels: GrayImage,
    pub captured_at: DateTime<Utc>,
}

impl FaceSample {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.class_name, &self.roll_no)
    }
}

/// Classifier output for one detected face in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionResult {
    pub label: u32,
    /// Distance to the closest training sample; lower is a better match.
    pub confidence: f64,
    pub bounding_box: FaceRegion,
}

/// Classifier artifact together with the label map it was trained with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub artifact: LbphModel,
    pub label_map: IdentityLabelMap,
    pub trained_at: DateTime<Utc>,
}
