//! Error type shared by the intake pipeline and its store adapters.

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP-equivalent category an error is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// 401: no usable credential.
    Unauthorized,
    /// 400: the caller sent something unusable.
    BadRequest,
    /// 500: a downstream store or service failed.
    Internal,
}

/// Errors that can occur while taking in an order batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No valid access token is available for the remote stores.
    #[error("authentication required")]
    AuthRequired,

    /// The manager / tab selector was missing or blank.
    #[error("missing selector: {0}")]
    MissingSelector(&'static str),

    /// The submission itself was malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Checking for or creating the destination tab failed.
    #[error("could not provision tab '{tab}': {message}")]
    Provisioning { tab: String, message: String },

    /// Writing the header row failed, including the forced fallback write.
    #[error("header write failed: {0}")]
    HeaderWrite(String),

    /// Uploading one of the batch's attachments failed.
    #[error("attachment {index} upload failed: {message}")]
    AttachmentUpload { index: usize, message: String },

    /// The batched row write failed.
    #[error("row write failed: {0}")]
    RowWrite(String),

    /// A tabular or attachment store call failed.
    #[error("store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The free-text extractor failed or returned something unusable.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or writing a workbook snapshot failed.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] std::io::Error),
}

impl Error {
    /// Creates a store error with the given message.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a store error carrying its cause.
    #[must_use]
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Category this error is surfaced under at the HTTP boundary.
    #[must_use]
    pub fn status(&self) -> ErrorStatus {
        match self {
            Self::AuthRequired => ErrorStatus::Unauthorized,
            Self::MissingSelector(_) | Self::InvalidInput(_) => ErrorStatus::BadRequest,
            _ => ErrorStatus::Internal,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
            return Self::AuthRequired;
        }
        Self::store_with_source("http request failed", err)
    }
}
