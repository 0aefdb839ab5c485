//! Service account authentication through a signed JWT assertion.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::credentials::{ServiceAccountKey, TOKEN_URI};
use super::DRIVE_SCOPE;
use crate::error::{DriveError, Result};

/// Tokens this close to expiry are treated as expired.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// JWT claims for service account authentication.
#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,   // Issuer (service account email)
    scope: &'a str, // OAuth scope
    aud: &'a str,   // Audience (token endpoint)
    exp: i64,       // Expiration time
    iat: i64,       // Issued at
}

/// OAuth2 token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Cached access token with expiration.
#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at > Utc::now() + Duration::seconds(EXPIRY_LEEWAY_SECS)
    }
}

/// Access tokens minted from a service account key, kept until they go stale.
#[derive(Clone)]
pub(crate) struct ServiceAccountSession {
    key: Arc<ServiceAccountKey>,
    http: Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl ServiceAccountSession {
    pub(crate) fn new(key: ServiceAccountKey) -> Self {
        Self {
            key: Arc::new(key),
            http: Client::new(),
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    pub(crate) async fn access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
                return Ok(token.access_token.clone());
            }
        }

        let token = fetch_token(&self.http, &self.key).await?;
        let access_token = token.access_token.clone();
        *self.cached_token.write().await = Some(token);
        Ok(access_token)
    }
}

/// Exchange a freshly signed assertion for an access token.
async fn fetch_token(http: &Client, key: &ServiceAccountKey) -> Result<CachedToken> {
    let token_uri = key.token_uri.as_deref().unwrap_or(TOKEN_URI);
    let now = Utc::now().timestamp();

    let claims = Claims {
        iss: &key.client_email,
        scope: DRIVE_SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + 3600,
    };

    let header = Header::new(Algorithm::RS256);
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
    let jwt = encode(&header, &claims, &encoding_key)?;

    let params = [
        ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
        ("assertion", jwt.as_str()),
    ];

    let response = http.post(token_uri).form(&params).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(DriveError::TokenRefreshError(format!(
            "Status {}: {}",
            status, body
        )));
    }

    let token: TokenResponse = response.json().await?;
    debug!(account = %key.client_email, "obtained service account token");

    Ok(CachedToken {
        access_token: token.access_token,
        expires_at: Utc::now() + Duration::seconds(token.expires_in as i64),
    })
}
