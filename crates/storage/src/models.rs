use serde::Serialize;
use sqlx::FromRow;

/// One stored face sample, exactly as persisted.
#[derive(Debug, Clone, FromRow)]
pub struct FaceSampleRow {
    pub id: i64,
    pub class_name: String,
    pub roll_no: String,
    pub width: i64,
    pub height: i64,
    pub pixels: Vec<u8>,
    pub captured_at: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct IdentityCount {
    pub class_name: String,
    pub roll_no: String,
    pub samples: i64,
}
