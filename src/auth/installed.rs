//! Installed-application OAuth flow.
//!
//! The consent handshake, loopback redirect and token refresh are handled by
//! yup-oauth2. This module feeds it the client secret, shows the consent URL
//! and keeps its tokens in a [`TokenStore`] as an authorized-user record.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use yup_oauth2::authenticator::DefaultAuthenticator;
use yup_oauth2::authenticator_delegate::InstalledFlowDelegate;
use yup_oauth2::storage::{TokenInfo, TokenStorage};
use yup_oauth2::{ApplicationSecret, InstalledFlowAuthenticator, InstalledFlowReturnMethod};

use super::credentials::ClientSecrets;
use crate::error::{DriveError, Result};
use crate::token_store::{StoredToken, TokenStore};

/// Build an installed-app authenticator backed by `store`.
///
/// Nothing is requested until the first token is asked for. A valid stored
/// token is then used as-is, an expired one is refreshed, and otherwise the
/// user is sent through consent with `present` receiving the URL.
pub(crate) async fn authenticator<F>(
    secrets: ClientSecrets,
    store: Arc<dyn TokenStore>,
    present: F,
) -> Result<DefaultAuthenticator>
where
    F: Fn(&str) + Send + Sync + 'static,
{
    let app_secret = application_secret(&secrets);
    let storage = StoreAdapter { secrets, store };

    let auth = InstalledFlowAuthenticator::builder(
        app_secret,
        InstalledFlowReturnMethod::HTTPRedirect,
    )
    .with_storage(Box::new(storage))
    .flow_delegate(Box::new(ConsentPresenter(present)))
    .build()
    .await?;

    Ok(auth)
}

fn application_secret(secrets: &ClientSecrets) -> ApplicationSecret {
    ApplicationSecret {
        client_id: secrets.client_id.clone(),
        client_secret: secrets.client_secret.clone(),
        auth_uri: secrets.auth_uri.clone(),
        token_uri: secrets.token_uri.clone(),
        ..Default::default()
    }
}

/// Hands the consent URL to a callback; the code comes back on the redirect.
struct ConsentPresenter<F>(F);

impl<F> InstalledFlowDelegate for ConsentPresenter<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn present_user_url<'a>(
        &'a self,
        url: &'a str,
        _need_code: bool,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<String, String>> + Send + 'a>> {
        info!("waiting for authorization redirect");
        (self.0)(url);
        Box::pin(async { Ok::<_, String>(String::new()) })
    }
}

/// Exposes a [`TokenStore`] as yup-oauth2 token storage.
struct StoreAdapter {
    secrets: ClientSecrets,
    store: Arc<dyn TokenStore>,
}

#[async_trait]
impl TokenStorage for StoreAdapter {
    async fn set(&self, scopes: &[&str], token: TokenInfo) -> anyhow::Result<()> {
        let stored = stored_token(&self.secrets, scopes, token)?;
        self.store.save(&stored)?;
        info!("saved authorized token");
        Ok(())
    }

    async fn get(&self, _scopes: &[&str]) -> Option<TokenInfo> {
        match self.store.load() {
            Ok(token) => token.map(token_info),
            Err(e) => {
                // An unreadable record is treated as absent, which leads to consent.
                warn!("ignoring stored token: {}", e);
                None
            }
        }
    }
}

fn token_info(token: StoredToken) -> TokenInfo {
    debug!("using stored token");
    TokenInfo {
        access_token: Some(token.token),
        refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
        expires_at: token
            .expiry
            .and_then(|expiry| OffsetDateTime::from_unix_timestamp(expiry.timestamp()).ok()),
        id_token: None,
    }
}

fn stored_token(secrets: &ClientSecrets, scopes: &[&str], token: TokenInfo) -> Result<StoredToken> {
    let access_token = token.access_token.ok_or_else(|| {
        DriveError::AuthenticationError("token response carried no access token".to_string())
    })?;

    Ok(StoredToken {
        token: access_token,
        refresh_token: token.refresh_token,
        token_uri: secrets.token_uri.clone(),
        client_id: secrets.client_id.clone(),
        client_secret: secrets.client_secret.clone(),
        scopes: scopes.iter().map(|s| s.to_string()).collect(),
        expiry: token
            .expires_at
            .and_then(|at| DateTime::from_timestamp(at.unix_timestamp(), at.nanosecond())),
    })
}
