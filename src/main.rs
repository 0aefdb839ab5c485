//! drive_store CLI - Manage files in Google Drive.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glob::glob;
use tracing_subscriber::EnvFilter;

use drive_store::config::{DEFAULT_CREDENTIALS_PATH, DEFAULT_TOKEN_PATH};
use drive_store::{Authenticator, ClientConfig, CredentialPaths, DriveClient, FileTokenStore};

/// CLI tool for managing files in Google Drive.
#[derive(Parser)]
#[command(name = "drive_store")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the OAuth client secret (or service account) JSON file.
    #[arg(long, env = "DRIVE_CREDENTIALS", default_value = DEFAULT_CREDENTIALS_PATH)]
    credentials: PathBuf,

    /// Path where the authorized token is cached.
    #[arg(long, env = "DRIVE_TOKEN", default_value = DEFAULT_TOKEN_PATH)]
    token: PathBuf,

    /// Chunk size in bytes for downloads and resumable uploads.
    #[arg(long, env = "DRIVE_CHUNK_SIZE")]
    chunk_size: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a folder.
    Mkdir {
        /// Folder name.
        name: String,

        /// Parent folder ID (defaults to the root).
        #[arg(long, short = 'p')]
        parent: Option<String>,
    },

    /// List the files in a folder.
    Ls {
        /// Folder ID.
        folder: String,
    },

    /// Upload files to a folder.
    Upload {
        /// Files to upload (supports glob patterns like *.tar).
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Destination folder ID.
        #[arg(long, short = 't')]
        to: String,

        /// Mime type of the uploaded content (guessed from the extension if unset).
        #[arg(long)]
        mime_type: Option<String>,
    },

    /// Download a file to the local filesystem.
    Download {
        /// File ID to download.
        file: String,

        /// Local destination path (file or directory).
        #[arg(long, short = 't', default_value = ".")]
        to: PathBuf,
    },

    /// Replace a file's content and metadata.
    Update {
        /// File ID to update.
        file: String,

        /// Local file with the new content.
        path: PathBuf,

        /// New name (defaults to the local file name).
        #[arg(long)]
        name: Option<String>,

        /// New description.
        #[arg(long, default_value = "")]
        description: String,

        /// Mime type of the new content.
        #[arg(long)]
        mime_type: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let paths = CredentialPaths {
        credentials: cli.credentials,
        token: cli.token,
    };

    // Initialize authenticator
    let store = Arc::new(FileTokenStore::new(&paths.token));
    let auth = Authenticator::authorize(&paths.credentials, store)
        .await
        .with_context(|| format!("Failed to authorize with {:?}", paths.credentials))?;

    let mut config = ClientConfig::default();
    if let Some(chunk_size) = cli.chunk_size {
        config = config
            .with_download_chunk_size(chunk_size)
            .with_upload_chunk_size(chunk_size);
    }

    // Create client
    let client = DriveClient::with_config(auth, config);

    match cli.command {
        Commands::Mkdir { name, parent } => {
            let folder_id = client
                .create_folder(&name, parent.as_deref())
                .await
                .with_context(|| format!("Failed to create folder: {}", name))?;
            println!("{}", folder_id);
        }

        Commands::Ls { folder } => {
            let files = client
                .search_file(&folder)
                .await
                .with_context(|| format!("Failed to list files in folder: {}", folder))?;

            if files.is_empty() {
                println!("No files found.");
            } else {
                println!("{:<44} {}", "ID", "NAME");
                println!("{}", "-".repeat(80));
                for file in files {
                    println!("{:<44} {}", file.id, file.name);
                }
            }
        }

        Commands::Upload {
            patterns,
            to,
            mime_type,
        } => {
            let mut files_to_upload: Vec<PathBuf> = Vec::new();

            for pattern in &patterns {
                let matches: Vec<PathBuf> = glob(pattern)
                    .with_context(|| format!("Invalid glob pattern: {}", pattern))?
                    .filter_map(|r| r.ok())
                    .filter(|p| p.is_file())
                    .collect();

                if matches.is_empty() {
                    eprintln!("Warning: No files matched pattern: {}", pattern);
                }
                files_to_upload.extend(matches);
            }

            files_to_upload.sort();
            files_to_upload.dedup();

            if files_to_upload.is_empty() {
                anyhow::bail!("No files to upload");
            }

            println!("Uploading {} file(s) to {}...", files_to_upload.len(), to);

            let mut failed = 0;
            for (idx, file_path) in files_to_upload.iter().enumerate() {
                let filename = file_path.file_name().unwrap_or_default().to_string_lossy();
                print!("[{}/{}] Uploading {}... ", idx + 1, files_to_upload.len(), filename);

                match client.upload_basic(file_path, &to, mime_type.as_deref()).await {
                    Ok(id) => println!("OK ({})", id),
                    Err(e) => {
                        failed += 1;
                        println!("FAILED");
                        eprintln!("  Error: {}", e);
                    }
                }
            }

            if failed > 0 {
                anyhow::bail!("{} of {} uploads failed", failed, files_to_upload.len());
            }
            println!("Done.");
        }

        Commands::Download { file, to } => {
            let final_path = if to.is_dir() {
                let metadata = client
                    .get_file(&file)
                    .await
                    .with_context(|| format!("Failed to look up file: {}", file))?;
                let name = metadata
                    .local_file_name()
                    .with_context(|| format!("Refusing to save file as {:?}", metadata.name))?;
                to.join(name)
            } else {
                if let Some(parent) = to.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)
                            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
                    }
                }
                to
            };

            let content = client
                .download_file(&file)
                .await
                .with_context(|| format!("Failed to download file: {}", file))?;

            tokio::fs::write(&final_path, &content)
                .await
                .with_context(|| format!("Failed to write {:?}", final_path))?;

            println!("Saved {} bytes to {:?}", content.len(), final_path);
        }

        Commands::Update {
            file,
            path,
            name,
            description,
            mime_type,
        } => {
            let metadata = client
                .update_file(
                    &file,
                    &path,
                    name.as_deref(),
                    &description,
                    mime_type.as_deref(),
                )
                .await
                .with_context(|| format!("Failed to update file: {}", file))?;
            println!("{}", metadata);
        }
    }

    Ok(())
}
