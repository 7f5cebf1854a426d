use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::application::models::auth::TokenPair;
use crate::application::models::user::User;
use crate::error::ApiError;
use crate::storage::CredentialStore;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

#[derive(Debug, Default)]
struct SessionInner {
    user: Option<User>,
    tokens: Option<TokenPair>,
    authenticated: bool,
}

/// Single source of truth for "am I logged in, as whom, with what tokens".
///
/// The token pair is held as one value and replaced wholesale, so no reader
/// can ever observe a new access token next to an old refresh token. The
/// sole writers are [`SessionState::set_tokens`], [`SessionState::restore`]
/// and [`SessionState::logout`]; everything else only reads.
pub struct SessionState {
    store: Arc<dyn CredentialStore>,
    inner: RwLock<SessionInner>,
}

impl SessionState {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            inner: RwLock::new(SessionInner::default()),
        }
    }

    /// Reads the persisted pair from the credential store, if a complete one
    /// exists. A half-written pair (one key missing) reads as absent.
    pub async fn load_persisted(&self) -> Result<Option<TokenPair>, ApiError> {
        let access = self.store.get(ACCESS_TOKEN_KEY).await?;
        let refresh = self.store.get(REFRESH_TOKEN_KEY).await?;

        match (access, refresh) {
            (Some(access_token), Some(refresh_token)) => Ok(Some(TokenPair {
                access_token,
                refresh_token,
                expires_at: None,
            })),
            _ => Ok(None),
        }
    }

    /// Adopts a persisted pair in memory only, optimistically marking the
    /// session authenticated. Used during initialization before the pair has
    /// been proven against the server.
    pub async fn restore(&self, pair: TokenPair) {
        let mut inner = self.inner.write().await;
        inner.tokens = Some(pair);
        inner.authenticated = true;
    }

    /// Persists the pair, then swaps it in under a single write lock.
    pub async fn set_tokens(&self, pair: TokenPair) -> Result<(), ApiError> {
        self.store.set(ACCESS_TOKEN_KEY, &pair.access_token).await?;
        self.store
            .set(REFRESH_TOKEN_KEY, &pair.refresh_token)
            .await?;

        let mut inner = self.inner.write().await;
        inner.tokens = Some(pair);
        inner.authenticated = true;
        debug!("Session tokens replaced");
        Ok(())
    }

    pub async fn set_user(&self, user: User) {
        let mut inner = self.inner.write().await;
        inner.user = Some(user);
    }

    pub async fn user(&self) -> Option<User> {
        self.inner.read().await.user.clone()
    }

    pub async fn tokens(&self) -> Option<TokenPair> {
        self.inner.read().await.tokens.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .tokens
            .as_ref()
            .map(|t| t.refresh_token.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.authenticated
    }

    /// Clears the session. Infallible and idempotent: the persisted state is
    /// being discarded anyway, so store delete failures are logged and
    /// swallowed.
    pub async fn logout(&self) {
        if let Err(e) = self.store.delete(ACCESS_TOKEN_KEY).await {
            warn!("Failed to delete persisted access token: {}", e);
        }
        if let Err(e) = self.store.delete(REFRESH_TOKEN_KEY).await {
            warn!("Failed to delete persisted refresh token: {}", e);
        }

        let mut inner = self.inner.write().await;
        inner.user = None;
        inner.tokens = None;
        inner.authenticated = false;
        debug!("Session cleared");
    }
}
