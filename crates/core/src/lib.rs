//! Core library: face gallery, LBPH training, live recognition and the attendance workbook.

pub mod attendance;
pub mod config;
pub mod enrollment;
pub mod error;
pub mod gallery;
pub mod labels;
pub mod lbph;
pub mod model_store;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod recognizer;
pub mod trainer;

pub use error::{AttendanceError, Result};
