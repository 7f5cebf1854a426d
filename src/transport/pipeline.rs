use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, instrument, warn};

use crate::application::models::auth::{RefreshRequest, TokenPair};
use crate::config::Config;
use crate::error::ApiError;
use crate::session::SessionState;
use crate::transport::http_client::HttpClient;

const REFRESH_PATH: &str = "/api/auth/refresh";

/// Outcome of asking the coordinator to handle an expiry episode.
pub(crate) enum RefreshRole {
    /// This request starts the refresh and must report back via `finish`.
    Leader,
    /// A refresh is already in flight; await the receiver for its outcome.
    Waiter(oneshot::Receiver<bool>),
}

#[derive(Default)]
struct RefreshQueue {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<bool>>,
}

/// Serializes token refreshes: however many requests hit a 401 at once, a
/// single refresh round trip is made and every affected request waits on
/// its outcome.
///
/// The check-and-set of the `refreshing` flag happens under one lock
/// acquisition, so no two requests can both become leader of the same
/// episode.
pub(crate) struct RefreshCoordinator {
    queue: Mutex<RefreshQueue>,
}

impl RefreshCoordinator {
    fn new() -> Self {
        Self {
            queue: Mutex::new(RefreshQueue::default()),
        }
    }

    pub(crate) async fn begin(&self) -> RefreshRole {
        let mut queue = self.queue.lock().await;
        if queue.refreshing {
            let (tx, rx) = oneshot::channel();
            queue.waiters.push(tx);
            RefreshRole::Waiter(rx)
        } else {
            queue.refreshing = true;
            RefreshRole::Leader
        }
    }

    /// Ends the episode: clears the flag and resumes every waiter, in
    /// enqueue order, with whether the session now holds renewed tokens.
    pub(crate) async fn finish(&self, renewed: bool) {
        let mut queue = self.queue.lock().await;
        queue.refreshing = false;
        for waiter in queue.waiters.drain(..) {
            let _ = waiter.send(renewed);
        }
    }
}

/// Authorization-aware front door for every outbound call.
///
/// Attaches the session's current access token, and on a 401 coordinates a
/// single token refresh across all concurrently failing requests before
/// replaying each of them exactly once. Any other outcome, success or
/// error, is returned to the caller unchanged.
pub struct RequestPipeline {
    http: HttpClient,
    session: Arc<SessionState>,
    coordinator: RefreshCoordinator,
}

impl RequestPipeline {
    pub fn new(config: &Config, session: Arc<SessionState>) -> Result<Self, ApiError> {
        let http = HttpClient::new(
            &config.api.base_url,
            Duration::from_secs(config.api.timeout),
        )?;
        Ok(Self {
            http,
            session,
            coordinator: RefreshCoordinator::new(),
        })
    }

    #[instrument(skip(self, body))]
    pub async fn request<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let token = self.session.access_token().await;
        match self
            .http
            .send(method.clone(), path, token.as_deref(), body)
            .await
        {
            Err(ApiError::Unauthorized) => {}
            outcome => return outcome,
        }

        debug!("401 on {} {}, entering refresh path", method, path);
        if !self.recover().await {
            // the caller gets its original authorization failure, never the
            // refresh endpoint's error
            return Err(ApiError::Unauthorized);
        }

        // single replay with the token re-read at resume time; its outcome
        // is final even if it is another 401
        let token = self.session.access_token().await;
        self.http.send(method, path, token.as_deref(), body).await
    }

    /// Runs one recovery episode. Returns true when the session holds
    /// renewed tokens and the caller should replay its request.
    async fn recover(&self) -> bool {
        match self.coordinator.begin().await {
            RefreshRole::Waiter(outcome) => outcome.await.unwrap_or(false),
            RefreshRole::Leader => {
                let renewed = match self.refresh().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Token refresh failed: {}", e);
                        false
                    }
                };
                if !renewed {
                    self.session.logout().await;
                }
                self.coordinator.finish(renewed).await;
                renewed
            }
        }
    }

    /// Exchanges the held refresh token for a new pair and stores it.
    ///
    /// Issued on the raw client so a rejected refresh can never re-enter
    /// the pipeline. Fails fast without a network call when no refresh
    /// token is held; a failed exchange mutates nothing and is never
    /// retried here.
    pub async fn refresh(&self) -> Result<(), ApiError> {
        let refresh_token = self
            .session
            .refresh_token()
            .await
            .ok_or(ApiError::NoRefreshToken)?;

        debug!("Exchanging refresh token");
        let request = RefreshRequest { refresh_token };
        let pair: TokenPair = self
            .http
            .send(Method::POST, REFRESH_PATH, None, Some(&request))
            .await
            .map_err(|e| match e {
                ApiError::Network(e) => ApiError::Network(e),
                ApiError::Json(e) => ApiError::Json(e),
                _ => ApiError::RefreshRejected,
            })?;

        self.session.set_tokens(pair).await?;
        debug!("Refresh succeeded, session tokens renewed");
        Ok(())
    }
}


#[cfg(test)]
mod tests_pipeline {
    use super::*;
    use crate::session::state::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
    use crate::storage::{CredentialStore, MemoryCredentialStore};
    use crate::utils::logger::setup_logger;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    fn test_config(server: &Server) -> Config {
        let mut config = Config::new();
        config.api.base_url = server.url();
        config.api.timeout = 5;
        config
    }

    async fn authenticated_pipeline(
        server: &Server,
        store: Arc<MemoryCredentialStore>,
    ) -> (RequestPipeline, Arc<SessionState>) {
        let session = Arc::new(SessionState::new(store));
        session
            .set_tokens(TokenPair {
                access_token: "A1".to_string(),
                refresh_token: "R1".to_string(),
                expires_at: None,
            })
            .await
            .unwrap();

        let pipeline = RequestPipeline::new(&test_config(server), session.clone()).unwrap();
        (pipeline, session)
    }

    async fn mock_refresh_success(server: &mut ServerGuard) -> Mock {
        server
            .mock("POST", "/api/auth/refresh")
            .match_body(Matcher::Json(json!({"refresh_token": "R1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "access_token": "A2",
                    "refresh_token": "R2",
                    "expires_at": 1756380900
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await
    }

    /// Refresh that holds its response long enough for every concurrently
    /// failing request to observe the episode as still in flight.
    async fn mock_refresh_slow(server: &mut ServerGuard) -> Mock {
        server
            .mock("POST", "/api/auth/refresh")
            .match_body(Matcher::Json(json!({"refresh_token": "R1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(200));
                writer.write_all(
                    json!({
                        "access_token": "A2",
                        "refresh_token": "R2",
                        "expires_at": 1756380900
                    })
                    .to_string()
                    .as_bytes(),
                )
            })
            .expect(1)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_attaches_current_access_token() {
        setup_logger();
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/api/recipients")
            .match_header("authorization", "Bearer A1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, _) = authenticated_pipeline(&server, store).await;

        let result: Vec<serde_json::Value> = pipeline
            .request::<(), _>(Method::GET, "/api/recipients", None)
            .await
            .unwrap();

        assert!(result.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unauthenticated_request_sends_no_header() {
        setup_logger();
        let mut server = Server::new_async().await;

        let mock = server
            .mock("POST", "/api/auth/login")
            .match_header("authorization", Matcher::Missing)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token": "A1", "refresh_token": "R1", "expires_at": 1}"#)
            .create_async()
            .await;

        let session = Arc::new(SessionState::new(Arc::new(MemoryCredentialStore::new())));
        let pipeline = RequestPipeline::new(&test_config(&server), session).unwrap();

        let body = json!({"email": "ada@example.com", "password": "pw"});
        let result: TokenPair = pipeline
            .request(Method::POST, "/api/auth/login", Some(&body))
            .await
            .unwrap();

        assert_eq!(result.access_token, "A1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_401_errors_pass_through_without_refresh() {
        setup_logger();
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/api/recipients/42")
            .with_status(404)
            .with_body(r#"{"error": "recipient not found"}"#)
            .create_async()
            .await;
        let refresh_mock = server
            .mock("POST", "/api/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, session) = authenticated_pipeline(&server, store).await;

        let result: Result<serde_json::Value, ApiError> = pipeline
            .request::<(), _>(Method::GET, "/api/recipients/42", None)
            .await;

        assert!(matches!(result, Err(ApiError::Api { .. })));
        assert!(session.is_authenticated().await);
        mock.assert_async().await;
        refresh_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_401_triggers_refresh_and_replay() {
        setup_logger();
        let mut server = Server::new_async().await;

        let stale = server
            .mock("GET", "/api/auth/me")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh_mock = mock_refresh_success(&mut server).await;
        let replayed = server
            .mock("GET", "/api/auth/me")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, session) = authenticated_pipeline(&server, store.clone()).await;

        let result: serde_json::Value = pipeline
            .request::<(), _>(Method::GET, "/api/auth/me", None)
            .await
            .unwrap();

        assert_eq!(result["ok"], true);
        // the renewed pair is live in memory and persisted as a unit
        let tokens = session.tokens().await.unwrap();
        assert_eq!(tokens.access_token, "A2");
        assert_eq!(tokens.refresh_token, "R2");
        assert_eq!(
            store.get(ACCESS_TOKEN_KEY).await.unwrap(),
            Some("A2".to_string())
        );
        assert_eq!(
            store.get(REFRESH_TOKEN_KEY).await.unwrap(),
            Some("R2".to_string())
        );

        stale.assert_async().await;
        refresh_mock.assert_async().await;
        replayed.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        setup_logger();
        let mut server = Server::new_async().await;

        let stale_x = server
            .mock("GET", "/api/recipients")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;
        let stale_y = server
            .mock("GET", "/api/auth/me")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh_mock = mock_refresh_slow(&mut server).await;
        let fresh_x = server
            .mock("GET", "/api/recipients")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;
        let fresh_y = server
            .mock("GET", "/api/auth/me")
            .match_header("authorization", "Bearer A2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, session) = authenticated_pipeline(&server, store).await;

        let (x, y) = tokio::join!(
            pipeline.request::<(), Vec<serde_json::Value>>(Method::GET, "/api/recipients", None),
            pipeline.request::<(), serde_json::Value>(Method::GET, "/api/auth/me", None),
        );

        assert!(x.unwrap().is_empty());
        assert_eq!(y.unwrap()["ok"], true);
        assert_eq!(session.access_token().await, Some("A2".to_string()));

        stale_x.assert_async().await;
        stale_y.assert_async().await;
        // exactly one refresh round trip for the whole episode
        refresh_mock.assert_async().await;
        fresh_x.assert_async().await;
        fresh_y.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejection_logs_out_and_surfaces_original_401() {
        setup_logger();
        let mut server = Server::new_async().await;

        let stale = server
            .mock("GET", "/api/recipients")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh_mock = server
            .mock("POST", "/api/auth/refresh")
            .with_status(401)
            .with_body(r#"{"error": "invalid refresh token"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, session) = authenticated_pipeline(&server, store.clone()).await;

        let result: Result<Vec<serde_json::Value>, ApiError> = pipeline
            .request::<(), _>(Method::GET, "/api/recipients", None)
            .await;

        // the caller sees its own 401, not the refresh endpoint's error
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert!(!session.is_authenticated().await);
        assert_eq!(session.tokens().await, None);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).await.unwrap(), None);

        stale.assert_async().await;
        refresh_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_failure_rejects_every_waiter() {
        setup_logger();
        let mut server = Server::new_async().await;

        let stale_x = server
            .mock("GET", "/api/recipients")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;
        let stale_y = server
            .mock("GET", "/api/auth/me")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh_mock = server
            .mock("POST", "/api/auth/refresh")
            .with_status(401)
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(200));
                writer.write_all(br#"{"error": "invalid refresh token"}"#)
            })
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, session) = authenticated_pipeline(&server, store).await;

        let (x, y) = tokio::join!(
            pipeline.request::<(), Vec<serde_json::Value>>(Method::GET, "/api/recipients", None),
            pipeline.request::<(), serde_json::Value>(Method::GET, "/api/auth/me", None),
        );

        assert!(matches!(x, Err(ApiError::Unauthorized)));
        assert!(matches!(y, Err(ApiError::Unauthorized)));
        assert!(!session.is_authenticated().await);

        stale_x.assert_async().await;
        stale_y.assert_async().await;
        refresh_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_replayed_401_is_final() {
        setup_logger();
        let mut server = Server::new_async().await;

        let stale = server
            .mock("GET", "/api/recipients")
            .match_header("authorization", "Bearer A1")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh_mock = mock_refresh_success(&mut server).await;
        let still_stale = server
            .mock("GET", "/api/recipients")
            .match_header("authorization", "Bearer A2")
            .with_status(401)
            .with_body(r#"{"error": "invalid or expired token"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, _) = authenticated_pipeline(&server, store).await;

        let result: Result<Vec<serde_json::Value>, ApiError> = pipeline
            .request::<(), _>(Method::GET, "/api/recipients", None)
            .await;

        // one refresh, one replay, then the 401 is returned as-is
        assert!(matches!(result, Err(ApiError::Unauthorized)));
        stale.assert_async().await;
        refresh_mock.assert_async().await;
        still_stale.assert_async().await;
    }

    #[tokio::test]
    async fn test_401_without_refresh_token_fails_fast() {
        setup_logger();
        let mut server = Server::new_async().await;

        let protected = server
            .mock("GET", "/api/recipients")
            .with_status(401)
            .with_body(r#"{"error": "authorization required"}"#)
            .expect(1)
            .create_async()
            .await;
        let refresh_mock = server
            .mock("POST", "/api/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let session = Arc::new(SessionState::new(Arc::new(MemoryCredentialStore::new())));
        let pipeline = RequestPipeline::new(&test_config(&server), session.clone()).unwrap();

        let result: Result<Vec<serde_json::Value>, ApiError> = pipeline
            .request::<(), _>(Method::GET, "/api/recipients", None)
            .await;

        assert!(matches!(result, Err(ApiError::Unauthorized)));
        assert!(!session.is_authenticated().await);
        protected.assert_async().await;
        // no refresh round trip was attempted
        refresh_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_manual_refresh_without_token_reports_missing_credential() {
        setup_logger();
        let server = Server::new_async().await;

        let session = Arc::new(SessionState::new(Arc::new(MemoryCredentialStore::new())));
        let pipeline = RequestPipeline::new(&test_config(&server), session).unwrap();

        let result = pipeline.refresh().await;
        assert!(matches!(result, Err(ApiError::NoRefreshToken)));
    }

    #[tokio::test]
    async fn test_rejected_refresh_mutates_nothing() {
        setup_logger();
        let mut server = Server::new_async().await;

        let refresh_mock = server
            .mock("POST", "/api/auth/refresh")
            .with_status(401)
            .with_body(r#"{"error": "invalid refresh token"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let (pipeline, session) = authenticated_pipeline(&server, store).await;

        let result = pipeline.refresh().await;

        // refresh itself reports failure and leaves the session intact; the
        // decision to log out belongs to the caller
        assert!(matches!(result, Err(ApiError::RefreshRejected)));
        assert!(session.is_authenticated().await);
        assert_eq!(session.access_token().await, Some("A1".to_string()));
        refresh_mock.assert_async().await;
    }
}
