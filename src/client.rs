//! Google Drive API client for folder, upload, download, listing and update
//! operations.

use std::path::Path;

use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, error, info};

use crate::auth::Authenticator;
use crate::config::ClientConfig;
use crate::error::{DriveError, Result};
use crate::models::{
    ApiErrorResponse, CreatedFile, FileEntry, FileListResponse, FileMetadata,
    FileMetadataRequest,
};
use crate::progress::{next_upload_offset, ContentRange, DownloadProgress};

/// Fields requested whenever a full metadata record is returned.
const METADATA_FIELDS: &str = "id, name, parents, mimeType, trashed, description, size";

/// Status the resumable upload protocol uses for "send the rest".
const RESUME_INCOMPLETE: u16 = 308;

/// Client for a user's Google Drive.
///
/// Every operation awaits its requests one after another; the client holds
/// no state besides the authenticated session.
pub struct DriveClient {
    auth: Authenticator,
    http: Client,
    config: ClientConfig,
}

impl DriveClient {
    /// Create a client against the public Drive endpoints.
    pub fn new(auth: Authenticator) -> Self {
        Self::with_config(auth, ClientConfig::default())
    }

    pub fn with_config(auth: Authenticator, config: ClientConfig) -> Self {
        Self {
            auth,
            http: Client::new(),
            config,
        }
    }

    /// Create a folder and return its id.
    ///
    /// # Arguments
    /// * `name` - Display name of the folder
    /// * `parent_id` - Parent folder, or `None` for the root
    pub async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String> {
        self.try_create_folder(name, parent_id)
            .await
            .inspect_err(|e| error!(folder = name, "An error occurred: {}", e))
    }

    async fn try_create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String> {
        let token = self.auth.access_token().await?;
        let metadata = FileMetadataRequest::folder(name, parent_id);

        let response = self
            .http
            .post(format!("{}/files", self.config.api_base))
            .bearer_auth(&token)
            .query(&[("fields", "id")])
            .json(&metadata)
            .send()
            .await?;

        let created: CreatedFile = check_status(response).await?.json().await?;
        info!("Folder ID: {}", created.id);
        Ok(created.id)
    }

    /// Download a file's content into memory.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        self.download_file_with_progress(file_id, |_| {}).await
    }

    /// Download a file's content, calling `on_progress` after every chunk.
    ///
    /// Content is fetched in ranges of `download_chunk_size` bytes. Any failure
    /// discards what was received so far.
    pub async fn download_file_with_progress<F>(
        &self,
        file_id: &str,
        on_progress: F,
    ) -> Result<Vec<u8>>
    where
        F: FnMut(&DownloadProgress),
    {
        self.try_download(file_id, on_progress)
            .await
            .inspect_err(|e| error!(file_id, "An error occurred: {}", e))
    }

    async fn try_download<F>(&self, file_id: &str, mut on_progress: F) -> Result<Vec<u8>>
    where
        F: FnMut(&DownloadProgress),
    {
        let token = self.auth.access_token().await?;
        let url = format!("{}/files/{}", self.config.api_base, file_id);
        let chunk_size = self.config.download_chunk_size();
        let mut content: Vec<u8> = Vec::new();

        loop {
            let start = content.len() as u64;
            let end = start + chunk_size - 1;

            let response = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .query(&[("alt", "media")])
                .header(RANGE, format!("bytes={}-{}", start, end))
                .send()
                .await?;

            let status = response.status();
            let content_range = parse_content_range(&response)?;

            // Ranged reads of an empty object are unsatisfiable.
            if status == StatusCode::RANGE_NOT_SATISFIABLE
                && start == 0
                && content_range.and_then(|r| r.total) == Some(0)
            {
                let progress = DownloadProgress {
                    received: 0,
                    total: 0,
                };
                info!("Download {}%", progress.percent());
                on_progress(&progress);
                break;
            }

            let response = check_status(response).await?;
            let ranged = status == StatusCode::PARTIAL_CONTENT;

            // Each reply has to continue exactly where the previous one ended.
            let first_byte = content_range.and_then(|r| r.range).map(|(first, _)| first);
            if (ranged && first_byte != Some(start)) || (!ranged && start > 0) {
                return Err(DriveError::InvalidResponse(format!(
                    "expected content from byte {}, got status {} with range {:?}",
                    start, status, first_byte
                )));
            }

            let mut received = 0usize;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                received += chunk.len();
                content.extend_from_slice(&chunk);
            }

            let total = if ranged {
                content_range.and_then(|r| r.total).ok_or_else(|| {
                    DriveError::InvalidResponse(
                        "partial content without a total size".to_string(),
                    )
                })?
            } else {
                // The whole body came back in one go.
                content.len() as u64
            };

            let progress = DownloadProgress {
                received: content.len() as u64,
                total,
            };
            info!("Download {}%", progress.percent());
            on_progress(&progress);

            if progress.is_complete() {
                break;
            }
            if received == 0 {
                return Err(DriveError::InvalidResponse(format!(
                    "download stalled at byte {} of {}",
                    start, total
                )));
            }
        }

        debug!(file_id, bytes = content.len(), "download complete");
        Ok(content)
    }

    /// List the non-trashed direct children of a folder.
    ///
    /// Pages are followed until the service stops returning a
    /// `nextPageToken`; entries keep their arrival order.
    pub async fn search_file(&self, parent_id: &str) -> Result<Vec<FileEntry>> {
        self.try_search(parent_id)
            .await
            .inspect_err(|e| error!(parent_id, "An error occurred: {}", e))
    }

    async fn try_search(&self, parent_id: &str) -> Result<Vec<FileEntry>> {
        let token = self.auth.access_token().await?;
        let query = format!("'{}' in parents and trashed = false", parent_id);
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/files", self.config.api_base))
                .bearer_auth(&token)
                .query(&[
                    ("q", query.as_str()),
                    ("spaces", "drive"),
                    ("fields", "nextPageToken, files(id, name)"),
                ]);

            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request.send().await?;
            let list_response: FileListResponse = check_status(response).await?.json().await?;

            for file in &list_response.files {
                info!("Found file: {}, {}", file.name, file.id);
            }
            all_files.extend(list_response.files);

            match list_response.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Get file metadata by ID.
    pub async fn get_file(&self, file_id: &str) -> Result<FileMetadata> {
        self.try_get_file(file_id)
            .await
            .inspect_err(|e| error!(file_id, "An error occurred: {}", e))
    }

    async fn try_get_file(&self, file_id: &str) -> Result<FileMetadata> {
        let token = self.auth.access_token().await?;

        let response = self
            .http
            .get(format!("{}/files/{}", self.config.api_base, file_id))
            .bearer_auth(&token)
            .query(&[("fields", METADATA_FIELDS)])
            .send()
            .await?;

        let metadata: FileMetadata = check_status(response).await?.json().await?;
        Ok(metadata)
    }

    /// Upload a local file into a folder and return the new file's id.
    ///
    /// The remote name is the file name component of `local_path`. Without an
    /// explicit `mime_type` one is guessed from the extension.
    pub async fn upload_basic<P: AsRef<Path>>(
        &self,
        local_path: P,
        parent_id: &str,
        mime_type: Option<&str>,
    ) -> Result<String> {
        let local_path = local_path.as_ref();
        self.try_upload_basic(local_path, parent_id, mime_type)
            .await
            .inspect_err(|e| error!(path = %local_path.display(), "An error occurred: {}", e))
    }

    async fn try_upload_basic(
        &self,
        local_path: &Path,
        parent_id: &str,
        mime_type: Option<&str>,
    ) -> Result<String> {
        let filename = file_name(local_path)?;
        let mime_type = resolve_mime_type(local_path, mime_type);
        let file_content = tokio::fs::read(local_path).await?;
        let token = self.auth.access_token().await?;

        let metadata = FileMetadataRequest {
            name: Some(filename.clone()),
            parents: vec![parent_id.to_string()],
            ..Default::default()
        };

        let metadata_part =
            Part::text(serde_json::to_string(&metadata)?).mime_str("application/json")?;

        let file_part = Part::bytes(file_content)
            .file_name(filename)
            .mime_str(&mime_type)?;

        let form = Form::new()
            .part("metadata", metadata_part)
            .part("file", file_part);

        let response = self
            .http
            .post(format!("{}/files", self.config.upload_base))
            .bearer_auth(&token)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .multipart(form)
            .send()
            .await?;

        let created: CreatedFile = check_status(response).await?.json().await?;
        info!("File ID: {}", created.id);
        Ok(created.id)
    }

    /// Replace a file's content, name and description.
    ///
    /// The file must exist: if fetching its metadata fails no update is sent.
    /// The new name defaults to the file name of `new_path`. Content goes up
    /// through a resumable session in `upload_chunk_size` pieces.
    pub async fn update_file<P: AsRef<Path>>(
        &self,
        file_id: &str,
        new_path: P,
        new_name: Option<&str>,
        new_description: &str,
        new_mime_type: Option<&str>,
    ) -> Result<FileMetadata> {
        self.try_update(
            file_id,
            new_path.as_ref(),
            new_name,
            new_description,
            new_mime_type,
        )
        .await
        .inspect_err(|e| error!(file_id, "An error occurred: {}", e))
    }

    async fn try_update(
        &self,
        file_id: &str,
        new_path: &Path,
        new_name: Option<&str>,
        new_description: &str,
        new_mime_type: Option<&str>,
    ) -> Result<FileMetadata> {
        let existing = self.try_get_file(file_id).await?;
        debug!(file_id, current_name = %existing.name, "updating file");

        let name = match new_name {
            Some(name) => name.to_string(),
            None => file_name(new_path)?,
        };
        let mime_type = resolve_mime_type(new_path, new_mime_type);
        let file_content = tokio::fs::read(new_path).await?;

        let metadata = FileMetadataRequest {
            name: Some(name),
            description: Some(new_description.to_string()),
            ..Default::default()
        };

        let session_url = self
            .start_resumable_update(file_id, &metadata, &mime_type, file_content.len() as u64)
            .await?;
        let updated = self
            .upload_to_session(&session_url, &file_content, &mime_type)
            .await?;

        info!(file_id, name = %updated.name, "file updated");
        Ok(updated)
    }

    /// Open a resumable upload session for an existing file.
    async fn start_resumable_update(
        &self,
        file_id: &str,
        metadata: &FileMetadataRequest,
        mime_type: &str,
        file_size: u64,
    ) -> Result<String> {
        let token = self.auth.access_token().await?;

        let response = self
            .http
            .patch(format!("{}/files/{}", self.config.upload_base, file_id))
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable"), ("fields", METADATA_FIELDS)])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", file_size.to_string())
            .json(metadata)
            .send()
            .await?;

        let response = check_status(response).await?;

        let upload_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DriveError::InvalidResponse("No upload URL in response".to_string()))?
            .to_string();

        Ok(upload_url)
    }

    /// Send the content to a resumable session, continuing from wherever the
    /// service says it left off.
    async fn upload_to_session(
        &self,
        session_url: &str,
        content: &[u8],
        mime_type: &str,
    ) -> Result<FileMetadata> {
        let total = content.len() as u64;
        let chunk_size = self.config.upload_chunk_size();
        let mut offset = 0u64;

        loop {
            let end = (offset + chunk_size).min(total);
            let content_range = if total == 0 {
                "bytes */0".to_string()
            } else {
                format!("bytes {}-{}/{}", offset, end - 1, total)
            };

            let response = self
                .http
                .put(session_url)
                .header(CONTENT_TYPE, mime_type)
                .header(CONTENT_RANGE, content_range)
                .body(content[offset as usize..end as usize].to_vec())
                .send()
                .await?;

            if response.status().as_u16() == RESUME_INCOMPLETE {
                let next = next_upload_offset(
                    response.headers().get(RANGE).and_then(|v| v.to_str().ok()),
                )?;
                if next <= offset || next > total {
                    return Err(DriveError::InvalidResponse(format!(
                        "resumable upload stuck at byte {} of {}",
                        offset, total
                    )));
                }
                debug!(next, total, "chunk accepted");
                offset = next;
                continue;
            }

            let metadata: FileMetadata = check_status(response).await?.json().await?;
            return Ok(metadata);
        }
    }
}

/// Turn a non-success response into an `ApiError`, preferring the message
/// from Google's JSON error body.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return Err(DriveError::ApiError {
            status: api_error.error.code,
            message: api_error.error.message,
        });
    }
    Err(DriveError::ApiError {
        status: status.as_u16(),
        message: error_body,
    })
}

fn parse_content_range(response: &Response) -> Result<Option<ContentRange>> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .map(ContentRange::parse)
        .transpose()
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DriveError::InvalidPath(path.display().to_string()))
}

fn resolve_mime_type(path: &Path, mime_type: Option<&str>) -> String {
    match mime_type {
        Some(mime_type) => mime_type.to_string(),
        None => mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string(),
    }
}
