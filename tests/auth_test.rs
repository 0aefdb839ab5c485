//! Tests for authorization, token refresh and token persistence.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use mockito::{Matcher, Server};
use serde_json::json;
use tempfile::{tempdir, NamedTempFile};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use drive_store::auth::DRIVE_SCOPE;
use drive_store::{
    Authenticator, Credentials, DriveError, FileTokenStore, MemoryTokenStore, StoredToken,
    TokenStore,
};

fn secrets_json(token_uri: &str) -> serde_json::Value {
    json!({
        "installed": {
            "client_id": "client-id",
            "client_secret": "client-secret",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": token_uri,
            "redirect_uris": ["http://localhost"]
        }
    })
}

fn credentials_file(token_uri: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(secrets_json(token_uri).to_string().as_bytes())
        .unwrap();
    file
}

fn installed_credentials(token_uri: &str) -> Credentials {
    Credentials::from_json(&secrets_json(token_uri).to_string()).unwrap()
}

fn stored(token: &str, expiry_in: Duration, refresh_token: Option<&str>) -> StoredToken {
    StoredToken {
        token: token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        token_uri: "unused".to_string(),
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        scopes: vec![DRIVE_SCOPE.to_string()],
        expiry: Some(Utc::now() + expiry_in),
    }
}

/// Memory store that counts how often a token is written.
#[derive(Default)]
struct CountingStore {
    inner: MemoryTokenStore,
    saves: AtomicUsize,
}

impl CountingStore {
    fn with(token: StoredToken) -> Self {
        Self {
            inner: MemoryTokenStore::new(Some(token)),
            saves: AtomicUsize::new(0),
        }
    }

    fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl TokenStore for CountingStore {
    fn load(&self) -> drive_store::Result<Option<StoredToken>> {
        self.inner.load()
    }

    fn save(&self, token: &StoredToken) -> drive_store::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(token)
    }
}

/// Play the browser: follow the consent redirect back to the loopback
/// listener with `query`.
///
/// Like a real browser it first opens and drops a connection, then asks for
/// a favicon, before sending the redirect itself.
fn follow_redirect(consent_url: &str, query: &'static str) {
    let url = Url::parse(consent_url).unwrap();
    let redirect_uri = url
        .query_pairs()
        .find(|(k, _)| k == "redirect_uri")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    let port = Url::parse(&redirect_uri).unwrap().port().unwrap();

    tokio::spawn(async move {
        drop(TcpStream::connect(("127.0.0.1", port)).await.unwrap());

        for target in ["/favicon.ico".to_string(), format!("/?{}", query)] {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            let request = format!(
                "GET {} HTTP/1.1\r\nHost: localhost:{}\r\nConnection: close\r\n\r\n",
                target, port
            );
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response).await;
        }
    });
}

mod authorize {
    use super::*;

    #[tokio::test]
    async fn test_valid_stored_token_needs_no_network() {
        let mut server = Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/token")
            .expect(0)
            .create_async()
            .await;

        let file = credentials_file(&format!("{}/token", server.url()));
        let store = Arc::new(MemoryTokenStore::new(Some(stored(
            "still-good",
            Duration::hours(1),
            Some("1//refresh"),
        ))));

        let auth = Authenticator::authorize(file.path(), store).await.unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "still-good");
        token_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_valid_stored_token_is_not_rewritten() {
        let server = Server::new_async().await;
        let store = Arc::new(CountingStore::with(stored(
            "still-good",
            Duration::hours(1),
            Some("1//refresh"),
        )));

        let auth = Authenticator::with_credentials(
            installed_credentials(&format!("{}/token", server.url())),
            store.clone(),
        )
        .await
        .unwrap();
        auth.access_token().await.unwrap();

        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_and_saved() {
        let mut server = Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "1//refresh".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
            ]))
            .with_body(r#"{"access_token": "fresh", "expires_in": 3599, "token_type": "Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let file = credentials_file(&format!("{}/token", server.url()));
        let store = Arc::new(CountingStore::with(stored(
            "stale",
            Duration::minutes(-5),
            Some("1//refresh"),
        )));

        let auth = Authenticator::authorize(file.path(), store.clone())
            .await
            .unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "fresh");
        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.token, "fresh");
        assert_eq!(saved.refresh_token.as_deref(), Some("1//refresh"));
        assert!(saved.expiry.unwrap() > Utc::now());
        assert_eq!(store.saves(), 1);
        token_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rewrites_token_file() {
        let mut server = Server::new_async().await;
        let _token_endpoint = server
            .mock("POST", "/token")
            .with_body(r#"{"access_token": "from-refresh", "expires_in": 3599}"#)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let token_path = dir.path().join("Credentials").join("token.json");
        let store = FileTokenStore::new(&token_path);
        store
            .save(&stored("old", Duration::hours(-1), Some("1//refresh")))
            .unwrap();

        let file = credentials_file(&format!("{}/token", server.url()));
        Authenticator::authorize(file.path(), Arc::new(store))
            .await
            .unwrap();

        let on_disk: StoredToken =
            serde_json::from_str(&std::fs::read_to_string(&token_path).unwrap()).unwrap();
        assert_eq!(on_disk.token, "from-refresh");
        assert_eq!(on_disk.refresh_token.as_deref(), Some("1//refresh"));
        assert_eq!(on_disk.client_id, "client-id");
        assert_eq!(on_disk.scopes, vec![DRIVE_SCOPE.to_string()]);
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_back_to_consent() {
        let mut server = Server::new_async().await;
        let refresh = server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant"}"#)
            .expect(1)
            .create_async()
            .await;
        let exchange = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "4/again".into()),
            ]))
            .with_body(
                r#"{"access_token": "after-consent", "refresh_token": "1//new", "expires_in": 3599}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(CountingStore::with(stored(
            "stale",
            Duration::hours(-1),
            Some("1//revoked"),
        )));

        let auth = Authenticator::with_presenter(
            installed_credentials(&format!("{}/token", server.url())),
            store.clone(),
            |url| follow_redirect(url, "code=4%2Fagain&scope=drive"),
        )
        .await
        .unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "after-consent");
        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("1//new"));
        refresh.assert_async().await;
        exchange.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_credentials_file() {
        let store = Arc::new(MemoryTokenStore::default());
        let result = Authenticator::authorize("/nonexistent/credentials.json", store).await;
        assert!(matches!(result, Err(DriveError::Io(_))));
    }

    #[tokio::test]
    async fn test_invalid_credentials_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"not valid json").unwrap();

        let store = Arc::new(MemoryTokenStore::default());
        let result = Authenticator::authorize(file.path(), store).await;
        assert!(matches!(result, Err(DriveError::Json(_))));
    }
}

mod consent_flow {
    use super::*;

    #[tokio::test]
    async fn test_code_is_exchanged_and_saved() {
        let mut server = Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "4/auth-code".into()),
                Matcher::UrlEncoded("client_id".into(), "client-id".into()),
                Matcher::Regex("redirect_uri=http%3A%2F%2Flocalhost%3A[0-9]+".into()),
            ]))
            .with_body(
                json!({
                    "access_token": "first-access",
                    "refresh_token": "1//first-refresh",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(CountingStore::default());
        let presented = Arc::new(Mutex::new(Vec::new()));
        let seen = presented.clone();

        let auth = Authenticator::with_presenter(
            installed_credentials(&format!("{}/token", server.url())),
            store.clone(),
            move |url| {
                seen.lock().unwrap().push(url.to_string());
                follow_redirect(url, "code=4%2Fauth-code&scope=drive");
            },
        )
        .await
        .unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "first-access");

        let presented = presented.lock().unwrap();
        assert_eq!(presented.len(), 1);
        let consent = Url::parse(&presented[0]).unwrap();
        let pairs: Vec<(String, String)> = consent.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".into(), "client-id".into())));
        assert!(pairs.contains(&("scope".into(), DRIVE_SCOPE.into())));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));

        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.token, "first-access");
        assert_eq!(saved.refresh_token.as_deref(), Some("1//first-refresh"));
        assert_eq!(saved.client_id, "client-id");
        assert_eq!(store.saves(), 1);
        token_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_code_exchange_fails_construction() {
        let mut server = Server::new_async().await;
        let _token_endpoint = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error": "invalid_grant", "error_description": "Bad Request"}"#)
            .create_async()
            .await;

        let store = Arc::new(CountingStore::default());
        let result = Authenticator::with_presenter(
            installed_credentials(&format!("{}/token", server.url())),
            store.clone(),
            |url| follow_redirect(url, "code=expired"),
        )
        .await;

        match result {
            Err(DriveError::OAuthError(e)) => assert!(e.to_string().contains("invalid_grant")),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("authorization should fail"),
        }
        assert_eq!(store.saves(), 0);
    }
}

mod service_account {
    use super::*;

    const PRIVATE_KEY: &str = include_str!("fixtures/service_account_key.pem");

    fn key_credentials(token_uri: &str) -> Credentials {
        let key = json!({
            "type": "service_account",
            "client_email": "bot@project.iam.gserviceaccount.com",
            "private_key": PRIVATE_KEY,
            "token_uri": token_uri
        });
        Credentials::from_json(&key.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_minted_token_is_cached_and_not_stored() {
        let mut server = Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "grant_type".into(),
                    "urn:ietf:params:oauth:grant-type:jwt-bearer".into(),
                ),
                Matcher::Regex("assertion=[A-Za-z0-9_-]+\\.[A-Za-z0-9_-]+\\.".into()),
            ]))
            .with_body(r#"{"access_token": "sa-token", "expires_in": 3600, "token_type": "Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(CountingStore::default());
        let auth = Authenticator::with_credentials(
            key_credentials(&format!("{}/token", server.url())),
            store.clone(),
        )
        .await
        .unwrap();

        assert_eq!(auth.access_token().await.unwrap(), "sa-token");
        assert_eq!(auth.access_token().await.unwrap(), "sa-token");
        assert_eq!(store.saves(), 0);
        token_endpoint.assert_async().await;
    }

    #[tokio::test]
    async fn test_rejected_assertion_fails_construction() {
        let mut server = Server::new_async().await;
        let _token_endpoint = server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error": "invalid_client"}"#)
            .create_async()
            .await;

        let result = Authenticator::with_credentials(
            key_credentials(&format!("{}/token", server.url())),
            Arc::new(MemoryTokenStore::default()),
        )
        .await;

        match result {
            Err(DriveError::TokenRefreshError(message)) => {
                assert!(message.contains("invalid_client"))
            }
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("authorization should fail"),
        }
    }
}
