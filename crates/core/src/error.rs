use providers::ProviderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttendanceError>;

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("invalid enrollment input: {0}")]
    InvalidEnrollmentInput(String),
    #[error("no training data: the gallery is empty")]
    NoTrainingData,
    #[error("no trained model available, run training first")]
    ModelNotTrained,
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("malformed identity key: {0}")]
    LabelFormat(String),
    #[error("corrupt sample {id}: {reason}")]
    CorruptSample { id: i64, reason: String },
    #[error("classifier failure: {0}")]
    Classifier(String),
    #[error("workbook error: {0}")]
    Workbook(String),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("model codec: {0}")]
    ModelCodec(#[from] bincode::Error),
    #[error(transparent)]
    Provider(ProviderError),
}

impl From<ProviderError> for AttendanceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::DeviceUnavailable(msg) => AttendanceError::DeviceUnavailable(msg),
            other => AttendanceError::Provider(other),
        }
    }
}

impl From<calamine::XlsxError> for AttendanceError {
    fn from(err: calamine::XlsxError) -> Self {
        AttendanceError::Workbook(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for AttendanceError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        AttendanceError::Workbook(err.to_string())
    }
}
