//! Replays a directory of still images as if they were camera frames.

use crate::{CameraOpener, FrameSource, ProviderError};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone)]
pub struct DirectoryOpener {
    dir: PathBuf,
}

impl DirectoryOpener {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CameraOpener for DirectoryOpener {
    fn open(&self) -> Result<Box<dyn FrameSource>, ProviderError> {
        if !self.dir.is_dir() {
            return Err(ProviderError::DeviceUnavailable(format!(
                "frame directory {} does not exist",
                self.dir.display()
            )));
        }
        let frames = list_frames(&self.dir);
        tracing::debug!("replaying {} frame(s) from {}", frames.len(), self.dir.display());
        Ok(Box::new(DirectorySource {
            frames: frames.into_iter(),
        }))
    }
}

struct DirectorySource {
    frames: std::vec::IntoIter<PathBuf>,
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>, ProviderError> {
        match self.frames.next() {
            Some(path) => image::open(&path)
                .map(Some)
                .map_err(|e| ProviderError::Capture(format!("{}: {}", path.display(), e))),
            None => Ok(None),
        }
    }
}

fn list_frames(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_frame(p))
        .collect()
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
