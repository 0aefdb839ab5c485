//! Error types for the drive_store crate.

use thiserror::Error;

/// Errors that can occur when talking to Google Drive.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid local path: {0}")]
    InvalidPath(String),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("OAuth error: {0}")]
    OAuthError(#[from] yup_oauth2::Error),

    #[error("JWT encoding error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("Token refresh failed: {0}")]
    TokenRefreshError(String),
}

impl DriveError {
    /// Whether the service reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DriveError::ApiError { status: 404, .. })
    }
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;
