//! Durable store of enrolled face samples.

use crate::error::{AttendanceError, Result};
use crate::models::{FaceSample, KEY_SEPARATOR};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use image::GrayImage;
use sqlx::SqlitePool;
use storage::models::{FaceSampleRow, IdentityCount};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Gallery {
    pool: SqlitePool,
}

impl Gallery {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends one sample per image for the identity. Either every image is
    /// stored or none is.
    pub async fn add_samples(
        &self,
        class_name: &str,
        roll_no: &str,
        images: &[GrayImage],
    ) -> Result<usize> {
        let class_name = class_name.trim();
        let roll_no = roll_no.trim();
        validate_enrollment(class_name, roll_no, images)?;

        let captured_at = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for image in images {
            sqlx::query(
                "INSERT INTO face_samples (class_name, roll_no, width, height, pixels, captured_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(class_name)
            .bind(roll_no)
            .bind(image.width() as i64)
            .bind(image.height() as i64)
            .bind(image.as_raw().as_slice())
            .bind(captured_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        info!(
            "stored {} sample(s) for {}{}{}",
            images.len(),
            class_name,
            KEY_SEPARATOR,
            roll_no
        );
        Ok(images.len())
    }

    /// Every stored sample in insertion order. Each call starts a fresh scan.
    pub fn all_samples(&self) -> BoxStream<'_, Result<FaceSample>> {
        sqlx::query_as::<_, FaceSampleRow>(
            "SELECT id, class_name, roll_no, width, height, pixels, captured_at
             FROM face_samples ORDER BY id",
        )
        .fetch(&self.pool)
        .map(|row| row.map_err(AttendanceError::from).and_then(into_sample))
        .boxed()
    }

    /// Sample counts per identity, ordered by first enrollment.
    pub async fn identities(&self) -> Result<Vec<IdentityCount>> {
        let rows = sqlx::query_as::<_, IdentityCount>(
            "SELECT class_name, roll_no, COUNT(*) AS samples
             FROM face_samples
             GROUP BY class_name, roll_no
             ORDER BY MIN(id)",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

fn validate_enrollment(class_name: &str, roll_no: &str, images: &[GrayImage]) -> Result<()> {
    if class_name.is_empty() || roll_no.is_empty() {
        return Err(AttendanceError::InvalidEnrollmentInput(
            "class name and roll number are required".into(),
        ));
    }
    if roll_no.contains(KEY_SEPARATOR) {
        return Err(AttendanceError::InvalidEnrollmentInput(format!(
            "roll number {roll_no:?} must not contain '{KEY_SEPARATOR}'"
        )));
    }
    if images.is_empty() {
        return Err(AttendanceError::InvalidEnrollmentInput(
            "at least one image is required".into(),
        ));
    }
    if let Some(idx) = images.iter().position(|i| i.width() == 0 || i.height() == 0) {
        return Err(AttendanceError::InvalidEnrollmentInput(format!(
            "image {idx} is empty"
        )));
    }
    Ok(())
}

fn into_sample(row: FaceSampleRow) -> Result<FaceSample> {
    let id = row.id;
    let corrupt = |reason: &str| AttendanceError::CorruptSample {
        id,
        reason: reason.to_string(),
    };
    let width = u32::try_from(row.width).map_err(|_| corrupt("bad width"))?;
    let height = u32::try_from(row.height).map_err(|_| corrupt("bad height"))?;
    let captured_at = DateTime::<Utc>::from_timestamp_millis(row.captured_at)
        .ok_or_else(|| corrupt("bad timestamp"))?;
    let pixels = GrayImage::from_raw(width, height, row.pixels)
        .ok_or_else(|| corrupt("pixel buffer does not match dimensions"))?;
    Ok(FaceSample {
        class_name: row.class_name,
        roll_no: row.roll_no,
        pixels,
        captured_at,
    })
}
