//! Canonical normalization shared by training and inference.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use providers::FaceRegion;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceSize {
    pub width: u32,
    pub height: u32,
}

impl FaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

pub fn to_gray(frame: &DynamicImage) -> GrayImage {
    frame.to_luma8()
}

/// Crops `region` out of `gray`, clamped to the image bounds. `None` when nothing is left.
pub fn crop_region(gray: &GrayImage, region: &FaceRegion) -> Option<GrayImage> {
    let x = region.x.min(gray.width());
    let y = region.y.min(gray.height());
    let width = region.width.min(gray.width() - x);
    let height = region.height.min(gray.height() - y);
    if width == 0 || height == 0 {
        return None;
    }
    Some(imageops::crop_imm(gray, x, y, width, height).to_image())
}

/// Resizes a grayscale face to the canonical size.
pub fn canonical(face: &GrayImage, size: FaceSize) -> GrayImage {
    if face.dimensions() == (size.width, size.height) {
        return face.clone();
    }
    imageops::resize(face, size.width, size.height, FilterType::Triangle)
}

pub fn normalize_region(gray: &GrayImage, region: &FaceRegion, size: FaceSize) -> Option<GrayImage> {
    crop_region(gray, region).map(|face| canonical(&face, size))
}
