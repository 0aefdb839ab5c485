//! drive_store - A small client for storing files in Google Drive.
//!
//! This library provides functionality to:
//! - Create folders
//! - Upload files into a folder
//! - Download file content
//! - List the children of a folder
//! - Replace a file's content, name and description
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use drive_store::{Authenticator, DriveClient, FileTokenStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(FileTokenStore::new("Credentials/token.json"));
//!     let auth = Authenticator::authorize("Credentials/credentials.json", store).await?;
//!     let client = DriveClient::new(auth);
//!
//!     let folder_id = client.create_folder("Reports", None).await?;
//!     let file_id = client.upload_basic("q3.pdf", &folder_id, None).await?;
//!     for entry in client.search_file(&folder_id).await? {
//!         println!("{}", entry);
//!     }
//!     let bytes = client.download_file(&file_id).await?;
//!     println!("{} bytes", bytes.len());
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod progress;
pub mod token_store;

// Re-exports for convenience
pub use auth::{Authenticator, Credentials};
pub use client::DriveClient;
pub use config::{ClientConfig, CredentialPaths};
pub use error::{DriveError, Result};
pub use models::{FileEntry, FileMetadata};
pub use progress::DownloadProgress;
pub use token_store::{FileTokenStore, MemoryTokenStore, StoredToken, TokenStore};
