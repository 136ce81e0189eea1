use autopro_core::Permission;
use thiserror::Error;

/// Audit export and forwarding errors.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("missing permission: {0}")]
    PermissionDenied(Permission),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("export is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("audit sink rejected entry: {0}")]
    Forward(String),

    #[error("audit request failed: {0}")]
    Http(#[from] reqwest::Error),
}
