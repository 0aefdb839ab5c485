//! Client secret files as downloaded from the Google Cloud console.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DriveError, Result};

/// Google OAuth2 authorization endpoint.
pub const AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

/// Google OAuth2 token endpoint.
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

fn default_auth_uri() -> String {
    AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    TOKEN_URI.to_string()
}

/// OAuth client id and secret of an installed (desktop) application.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Service account key file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub token_uri: Option<String>,
}

/// Contents of the client secret file.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// `{"installed": {...}}` or `{"web": {...}}`.
    Installed(ClientSecrets),
    /// `{"type": "service_account", ...}`.
    ServiceAccount(ServiceAccountKey),
}

impl Credentials {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(content)?;

        if value.get("type").and_then(Value::as_str) == Some("service_account") {
            let key: ServiceAccountKey = serde_json::from_value(value)?;
            return Ok(Credentials::ServiceAccount(key));
        }

        for section in ["installed", "web"] {
            if let Some(secrets) = value.get_mut(section).map(Value::take) {
                let secrets: ClientSecrets = serde_json::from_value(secrets)?;
                return Ok(Credentials::Installed(secrets));
            }
        }

        Err(DriveError::AuthenticationError(
            "client secret file has neither an \"installed\", \"web\" nor service account section"
                .to_string(),
        ))
    }
}
