//! Endpoint and credential-location settings.

use std::path::PathBuf;

/// Base URL for Google Drive API v3.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Upload URL for Google Drive API.
pub const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Default chunk size for ranged downloads and resumable uploads (100 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Resumable upload chunks must be multiples of this (256 KiB).
pub const UPLOAD_CHUNK_GRANULARITY: u64 = 256 * 1024;

/// Default location of the OAuth client secret file.
pub const DEFAULT_CREDENTIALS_PATH: &str = "Credentials/credentials.json";

/// Default location of the persisted token file.
pub const DEFAULT_TOKEN_PATH: &str = "Credentials/token.json";

/// Settings for [`DriveClient`](crate::DriveClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub upload_base: String,
    download_chunk_size: u64,
    upload_chunk_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
            download_chunk_size: DEFAULT_CHUNK_SIZE,
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    /// Point both API and upload endpoints at `root`, e.g. a mock server.
    ///
    /// Paths keep the public layout: `{root}/drive/v3` and `{root}/upload/drive/v3`.
    pub fn with_root(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            api_base: format!("{}/drive/v3", root),
            upload_base: format!("{}/upload/drive/v3", root),
            ..Self::default()
        }
    }

    pub fn with_download_chunk_size(mut self, bytes: u64) -> Self {
        self.download_chunk_size = bytes.max(1);
        self
    }

    /// Set the resumable upload chunk size, rounded up to 256 KiB.
    pub fn with_upload_chunk_size(mut self, bytes: u64) -> Self {
        let chunks = bytes.max(1).div_ceil(UPLOAD_CHUNK_GRANULARITY);
        self.upload_chunk_size = chunks * UPLOAD_CHUNK_GRANULARITY;
        self
    }

    pub fn download_chunk_size(&self) -> u64 {
        self.download_chunk_size
    }

    pub fn upload_chunk_size(&self) -> u64 {
        self.upload_chunk_size
    }
}

/// Locations of the client secret and persisted token files.
#[derive(Debug, Clone)]
pub struct CredentialPaths {
    pub credentials: PathBuf,
    pub token: PathBuf,
}

impl Default for CredentialPaths {
    fn default() -> Self {
        Self {
            credentials: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            token: PathBuf::from(DEFAULT_TOKEN_PATH),
        }
    }
}
