use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid {field} pattern: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid file type for {0}. Allowed: pdf, png, jpg, jpeg")]
    UnsupportedFileType(String),

    #[error("OCR produced no text")]
    EmptyText,

    #[error("{program} timed out after {seconds} seconds")]
    Timeout { program: String, seconds: u64 },

    #[error("{program} failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(std::path::PathBuf),

    #[error("image preprocessing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("preprocessing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ExtractionError> for AppError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::UnsupportedFileType(_) => AppError::BadRequest(anyhow::Error::new(err)),
            ExtractionError::InvalidPattern { .. } => {
                AppError::InternalError(anyhow::Error::new(err))
            }
            other => AppError::ProcessingError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn client_errors_and_server_errors_are_distinguished() {
        let unsupported: AppError = ExtractionError::UnsupportedFileType("notes.txt".into()).into();
        assert_eq!(unsupported.status_code(), StatusCode::BAD_REQUEST);

        let source = regex::Regex::new("(unclosed").unwrap_err();
        let invalid: AppError = ExtractionError::InvalidPattern {
            field: "transaction",
            source,
        }
        .into();
        assert!(matches!(invalid, AppError::InternalError(_)));
        assert_eq!(invalid.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let empty: AppError = ExtractionError::EmptyText.into();
        assert!(matches!(empty, AppError::ProcessingError(_)));
    }
}
