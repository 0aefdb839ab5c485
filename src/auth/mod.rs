//! Authentication for the Google Drive API.
//!
//! Desktop clients go through the installed-app flow once and then live off
//! the refresh token kept in a [`TokenStore`]. Service account keys mint a
//! fresh token with a signed JWT whenever the cached one runs out.

pub mod credentials;
mod installed;
mod service_account;

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use yup_oauth2::authenticator::DefaultAuthenticator;

pub use credentials::{ClientSecrets, Credentials, ServiceAccountKey};

use crate::error::{DriveError, Result};
use crate::token_store::TokenStore;
use service_account::ServiceAccountSession;

/// Google Drive API scope.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Authenticated session handle shared by every Drive request.
#[derive(Clone)]
pub struct Authenticator {
    session: Session,
}

#[derive(Clone)]
enum Session {
    Installed(DefaultAuthenticator),
    ServiceAccount(ServiceAccountSession),
}

impl Authenticator {
    /// Read the client secret file at `credentials_path` and authorize.
    pub async fn authorize<P: AsRef<Path>>(
        credentials_path: P,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let credentials = Credentials::from_file(credentials_path)?;
        Self::with_credentials(credentials, store).await
    }

    /// Authorize with already-parsed credentials, printing the consent URL
    /// if the user has to sign in.
    pub async fn with_credentials(
        credentials: Credentials,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        Self::with_presenter(credentials, store, print_consent_url).await
    }

    /// Authorize with already-parsed credentials.
    ///
    /// For an installed app the stored token is used as-is while valid and
    /// refreshed when expired. Without a usable token (or when the refresh is
    /// rejected) the consent flow runs and `present` receives the URL to open.
    /// Only newly obtained or refreshed tokens are written to `store`.
    ///
    /// Service account tokens are minted directly and never stored.
    pub async fn with_presenter<F>(
        credentials: Credentials,
        store: Arc<dyn TokenStore>,
        present: F,
    ) -> Result<Self>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let session = match credentials {
            Credentials::Installed(secrets) => {
                Session::Installed(installed::authenticator(secrets, store, present).await?)
            }
            Credentials::ServiceAccount(key) => {
                Session::ServiceAccount(ServiceAccountSession::new(key))
            }
        };

        let auth = Self { session };
        auth.access_token().await?;
        info!("authorized");
        Ok(auth)
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn access_token(&self) -> Result<String> {
        match &self.session {
            Session::Installed(auth) => {
                let token = auth.token(&[DRIVE_SCOPE]).await?;
                token.token().map(str::to_string).ok_or_else(|| {
                    DriveError::AuthenticationError("no access token issued".to_string())
                })
            }
            Session::ServiceAccount(session) => session.access_token().await,
        }
    }
}

fn print_consent_url(url: &str) {
    println!(
        "Please visit this URL to authorize this application: {}",
        url
    );
}
