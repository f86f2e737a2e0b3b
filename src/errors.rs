use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Source lookup found nothing usable for the song.
    #[error("source not found")]
    SourceNotFound,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Checksum mismatch for {name}: expected {expected}, got {actual}")]
    Integrity {
        name: String,
        expected: String,
        actual: String,
    },

    /// Nonzero exit of an external tool. Displays the captured stderr as is.
    #[error("{stderr}")]
    ToolExecution {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Tagging error: {0}")]
    Tagging(String),

    #[error("Artwork error: {0}")]
    Artwork(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AppError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AppError::Cancelled)
    }

    /// Errors a mirror fallback may recover from by trying the next URL.
    pub fn is_network(&self) -> bool {
        matches!(self, AppError::Network(_) | AppError::Http(_) | AppError::Io(_))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
