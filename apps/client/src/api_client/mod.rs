//! The single entry point for every REST call the client makes.
//!
//! Attaches the bearer token, normalizes failures into `ApiError`, and performs at
//! most one refresh-and-reissue cycle when the server rejects the token.
//!
//! The expiry path is the one place outside the session manager that writes
//! credential state: when no refresh is possible it clears the token store, tells
//! every expiry listener (the session manager registers one) and sends the user to
//! the login route.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, info, warn};

use crate::errors::ApiError;
use crate::models::user::{RefreshRequest, RefreshResponse};
use crate::navigation::{Navigator, LOGIN_ROUTE};
use crate::storage::TokenStore;

pub mod request;

pub use request::{ApiRequest, FileUpload};
use request::RequestBody;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const REFRESH_PATH: &str = "/auth/refresh";
/// Refresh-and-reissue cycles allowed per call. One, never a loop.
const MAX_REFRESH_ATTEMPTS: u32 = 1;

/// Called synchronously, after the store is cleared, whenever the session expires.
pub type ExpiryListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    base_url: String,
    tokens: TokenStore,
    navigator: Arc<dyn Navigator>,
    /// Serializes refreshes so concurrent 401s share one exchange.
    refresh_lock: tokio::sync::Mutex<()>,
    expiry_listeners: Mutex<Vec<ExpiryListener>>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        tokens: TokenStore,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                tokens,
                navigator,
                refresh_lock: tokio::sync::Mutex::new(()),
                expiry_listeners: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Registers a callback for unrecoverable credential rejection, whichever
    /// caller's request triggered it.
    pub fn on_session_expired<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner
            .expiry_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn get_with_query<Q, T>(&self, path: &str, query: &Q) -> Result<T, ApiError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::get(path).query(query)?).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Sends the request and decodes a successful body as `T`.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let body = self.execute(&request).await?;
        decode(&body)
    }

    async fn execute(&self, request: &ApiRequest) -> Result<String, ApiError> {
        let mut attempt = 0;
        loop {
            let credential = if request.is_authorized() {
                self.inner.tokens.get()
            } else {
                None
            };
            let (status, body) = self.dispatch(request, credential.as_deref(), attempt).await?;

            if status == StatusCode::UNAUTHORIZED
                && request.refreshes_on_unauthorized()
                && attempt < MAX_REFRESH_ATTEMPTS
            {
                debug!(path = request.path(), "Credential rejected; refreshing before reissue");
                self.refresh_credential(credential.as_deref()).await?;
                attempt += 1;
                continue;
            }

            return finish(request, status, body);
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<&str>,
        attempt: u32,
    ) -> Result<(StatusCode, String), ApiError> {
        let url = format!("{}{}", self.inner.base_url, request.path());
        let mut builder = self.inner.http.request(request.method().clone(), url.as_str());

        if !request.query_pairs().is_empty() {
            builder = builder.query(request.query_pairs());
        }
        if let Some(token) = credential {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body() {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Multipart(upload)) => builder.multipart(upload.to_form()?),
            None => builder,
        };

        debug!(method = %request.method(), path = request.path(), attempt, "Sending request");

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Exchanges the refresh credential for a new bearer token.
    ///
    /// `rejected` is the token the server just refused. If the store already holds a
    /// different one, a concurrent caller refreshed while this one waited for the lock.
    /// Any failure here ends the session.
    async fn refresh_credential(&self, rejected: Option<&str>) -> Result<(), ApiError> {
        let _guard = self.inner.refresh_lock.lock().await;

        if let Some(current) = self.inner.tokens.get() {
            if Some(current.as_str()) != rejected {
                debug!("Credential already refreshed by a concurrent request");
                return Ok(());
            }
        }

        let Some(refresh_token) = self.inner.tokens.refresh_token() else {
            warn!("No refresh credential stored; ending session");
            self.expire_session();
            return Err(ApiError::SessionExpired);
        };

        let request = ApiRequest::post(REFRESH_PATH)
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })?
            .without_refresh()
            .anonymous();

        let refreshed = match self.dispatch(&request, None, 0).await {
            Ok((status, body)) => {
                finish(&request, status, body).and_then(|body| decode::<RefreshResponse>(&body))
            }
            Err(e) => Err(e),
        };

        let stored = refreshed.and_then(|refreshed| {
            self.inner.tokens.set(&refreshed.token)?;
            if let Some(rotated) = refreshed.refresh_token.as_deref() {
                self.inner.tokens.set_refresh_token(rotated)?;
            }
            Ok(())
        });

        match stored {
            Ok(()) => {
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!("Token refresh failed ({e}); ending session");
                self.expire_session();
                Err(ApiError::SessionExpired)
            }
        }
    }

    fn expire_session(&self) {
        self.inner.tokens.clear_all();
        let listeners = self
            .inner
            .expiry_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener();
        }
        self.inner.navigator.navigate(LOGIN_ROUTE);
    }
}

fn finish(request: &ApiRequest, status: StatusCode, body: String) -> Result<String, ApiError> {
    if status.is_success() {
        return Ok(body);
    }

    let err = ApiError::from_status(status, &body);
    if status == StatusCode::FORBIDDEN {
        warn!(path = request.path(), "Request forbidden: {err}");
    } else if status.is_server_error() {
        error!(path = request.path(), status = status.as_u16(), "Server error: {err}");
    } else {
        debug!(path = request.path(), status = status.as_u16(), "Request rejected: {err}");
    }
    Err(err)
}

/// Empty bodies decode as `{}` so acknowledgement types with defaults still parse.
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    let text = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::Ack;
    use crate::navigation::HistoryNavigator;
    use crate::storage::{MemoryStorage, StorageBackend, StorageError, REFRESH_TOKEN_KEY, TOKEN_KEY};
    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, tokens: &TokenStore, nav: &Arc<HistoryNavigator>) -> ApiClient {
        ApiClient::new(
            &format!("{}/api", server.uri()),
            DEFAULT_TIMEOUT,
            tokens.clone(),
            nav.clone(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/saved"))
            .and(header("Authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobs": []})))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set("abc").unwrap();
        let nav = Arc::new(HistoryNavigator::default());

        let body: Value = client(&server, &tokens, &nav).get("/jobs/saved").await.unwrap();
        assert_eq!(body, json!({"jobs": []}));
    }

    #[tokio::test]
    async fn test_single_refresh_then_reissue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/verify"))
            .and(header("Authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "fresh", "refreshToken": "r2"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/auth/verify"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set("stale").unwrap();
        tokens.set_refresh_token("r1").unwrap();
        let nav = Arc::new(HistoryNavigator::default());

        let body: Value = client(&server, &tokens, &nav).get("/auth/verify").await.unwrap();

        assert_eq!(body, json!({"ok": true}));
        assert_eq!(tokens.get().as_deref(), Some("fresh"));
        assert_eq!(tokens.refresh_token().as_deref(), Some("r2"));
        assert!(nav.history().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresh_token_expires_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/resumes"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set("stale").unwrap();
        let nav = Arc::new(HistoryNavigator::default());

        let result: Result<Value, _> = client(&server, &tokens, &nav).get("/resumes").await;

        assert_eq!(result, Err(ApiError::SessionExpired));
        assert_eq!(tokens.get(), None);
        assert_eq!(nav.current().as_deref(), Some(LOGIN_ROUTE));
    }

    #[tokio::test]
    async fn test_failed_refresh_expires_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/resumes"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set("stale").unwrap();
        tokens.set_refresh_token("old").unwrap();
        let nav = Arc::new(HistoryNavigator::default());

        let result: Result<Value, _> = client(&server, &tokens, &nav).get("/resumes").await;

        assert_eq!(result, Err(ApiError::SessionExpired));
        assert_eq!(tokens.get(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert_eq!(nav.history(), vec![LOGIN_ROUTE]);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/saved"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Nope"})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set("stale").unwrap();
        tokens.set_refresh_token("r1").unwrap();
        let nav = Arc::new(HistoryNavigator::default());

        let result: Result<Value, _> = client(&server, &tokens, &nav).get("/jobs/saved").await;

        assert_eq!(result, Err(ApiError::Unauthorized("Nope".to_string())));
        assert_eq!(tokens.get().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_login_unauthorized_skips_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/login"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid email or password"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set_refresh_token("r1").unwrap();
        let nav = Arc::new(HistoryNavigator::default());

        let request = ApiRequest::post("/auth/login")
            .json(&json!({"email": "a@b.com", "password": "x"}))
            .unwrap()
            .without_refresh();
        let result: Result<Value, _> = client(&server, &tokens, &nav).send(request).await;

        assert_eq!(
            result,
            Err(ApiError::Unauthorized("Invalid email or password".to_string()))
        );
        assert_eq!(tokens.refresh_token().as_deref(), Some("r1"));
        assert!(nav.history().is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_and_server_errors_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/candidates/search"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "Employers only"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        let nav = Arc::new(HistoryNavigator::default());
        let api = client(&server, &tokens, &nav);

        let forbidden: Result<Value, _> = api.get("/candidates/search").await;
        assert_eq!(forbidden, Err(ApiError::Forbidden("Employers only".to_string())));

        let unavailable: Result<Value, _> = api.get("/jobs").await;
        assert_eq!(unavailable.unwrap_err().status(), Some(503));
    }

    #[tokio::test]
    async fn test_empty_body_decodes_as_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/logout"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        let nav = Arc::new(HistoryNavigator::default());

        let ack: Ack = client(&server, &tokens, &nav)
            .send(ApiRequest::post("/auth/logout"))
            .await
            .unwrap();
        assert_eq!(ack.message, None);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let tokens = TokenStore::in_memory();
        let nav: Arc<dyn Navigator> = Arc::new(HistoryNavigator::default());
        let api = ApiClient::new("http://127.0.0.1:9/api", DEFAULT_TIMEOUT, tokens, nav).unwrap();

        let result: Result<Value, _> = api.get("/jobs").await;
        assert_eq!(
            result,
            Err(ApiError::Network(crate::errors::NETWORK_ERROR_MESSAGE.to_string()))
        );
    }

    /// Keeps the seeded credentials but refuses to store new ones.
    struct SealedStorage(MemoryStorage);

    impl StorageBackend for SealedStorage {
        fn read(&self, key: &str) -> Option<String> {
            self.0.read(key)
        }

        fn write(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Write {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "sealed"),
            })
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.0.remove(key)
        }
    }

    #[tokio::test]
    async fn test_unstorable_refresh_expires_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/saved"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "fresh"})))
            .expect(1)
            .mount(&server)
            .await;

        let seeded = MemoryStorage::default();
        seeded.write(TOKEN_KEY, "stale").unwrap();
        seeded.write(REFRESH_TOKEN_KEY, "r1").unwrap();
        let tokens = TokenStore::new(SealedStorage(seeded));
        let nav = Arc::new(HistoryNavigator::default());

        let result: Result<Value, _> = client(&server, &tokens, &nav).get("/jobs/saved").await;

        assert_eq!(result, Err(ApiError::SessionExpired));
        assert_eq!(tokens.get(), None);
        assert_eq!(tokens.refresh_token(), None);
        assert_eq!(nav.current().as_deref(), Some(LOGIN_ROUTE));
    }

    #[tokio::test]
    async fn test_concurrent_unauthorized_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/saved"))
            .and(header("Authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/jobs/saved"))
            .and(header("Authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobs": []})))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json(json!({"refreshToken": "r1"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(std::time::Duration::from_millis(200))
                    .set_body_json(json!({"token": "fresh", "refreshToken": "r2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set("stale").unwrap();
        tokens.set_refresh_token("r1").unwrap();
        let nav = Arc::new(HistoryNavigator::default());
        let api = client(&server, &tokens, &nav);

        let (first, second) = tokio::join!(
            api.get::<Value>("/jobs/saved"),
            api.get::<Value>("/jobs/saved"),
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(tokens.get().as_deref(), Some("fresh"));
        assert_eq!(tokens.refresh_token().as_deref(), Some("r2"));
        assert!(nav.history().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_listeners_run_before_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/resumes"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let tokens = TokenStore::in_memory();
        tokens.set("stale").unwrap();
        let nav = Arc::new(HistoryNavigator::default());
        let api = client(&server, &tokens, &nav);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (seen_by_listener, nav_by_listener) = (seen.clone(), nav.clone());
        api.on_session_expired(move || {
            seen_by_listener
                .lock()
                .unwrap()
                .push(nav_by_listener.history().len());
        });

        let result: Result<Value, _> = api.get("/resumes").await;

        assert_eq!(result, Err(ApiError::SessionExpired));
        assert_eq!(*seen.lock().unwrap(), vec![0]);
        assert_eq!(nav.history(), vec![LOGIN_ROUTE]);
    }
}
