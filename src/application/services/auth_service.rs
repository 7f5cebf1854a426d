use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::application::models::auth::{
    LoginRequest, RegisterRequest, SocialLoginRequest, TokenPair,
};
use crate::application::models::user::User;
use crate::error::ApiError;
use crate::session::SessionState;
use crate::transport::RequestPipeline;

/// Authentication operations and session lifecycle.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Restores a previous session from the credential store. Resolves to
    /// the current user when the persisted tokens are (or can be refreshed
    /// to be) valid, and to `None` with a cleared session otherwise.
    async fn initialize(&self) -> Result<Option<User>, ApiError>;

    async fn register(&self, email: &str, password: &str, name: &str) -> Result<User, ApiError>;

    async fn login(&self, email: &str, password: &str) -> Result<User, ApiError>;

    async fn login_with_google(&self, id_token: &str) -> Result<User, ApiError>;

    async fn login_with_apple(&self, id_token: &str) -> Result<User, ApiError>;

    /// Fetches the authenticated account from the server.
    async fn me(&self) -> Result<User, ApiError>;

    async fn logout(&self);
}

pub struct AuthServiceImpl {
    pipeline: Arc<RequestPipeline>,
    session: Arc<SessionState>,
}

impl AuthServiceImpl {
    pub fn new(pipeline: Arc<RequestPipeline>, session: Arc<SessionState>) -> Self {
        Self { pipeline, session }
    }

    /// Stores the pair from a successful auth call, then fetches and stores
    /// the account it belongs to.
    async fn adopt_tokens(&self, tokens: TokenPair) -> Result<User, ApiError> {
        self.session.set_tokens(tokens).await?;
        let user = self.me().await?;
        self.session.set_user(user.clone()).await;
        Ok(user)
    }
}

#[async_trait]
impl AuthService for AuthServiceImpl {
    #[instrument(skip(self))]
    async fn initialize(&self) -> Result<Option<User>, ApiError> {
        let Some(pair) = self.session.load_persisted().await? else {
            debug!("No persisted tokens, starting unauthenticated");
            return Ok(None);
        };

        // adopt the pair optimistically; the pipeline supplies the
        // one-refresh-then-retry behavior if the access token went stale
        self.session.restore(pair).await;

        match self.me().await {
            Ok(user) => {
                info!("Session restored for {}", user.email);
                self.session.set_user(user.clone()).await;
                Ok(Some(user))
            }
            Err(e) => {
                warn!("Persisted session could not be restored: {}", e);
                self.session.logout().await;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, password))]
    async fn register(&self, email: &str, password: &str, name: &str) -> Result<User, ApiError> {
        let request = RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        };
        let tokens: TokenPair = self
            .pipeline
            .request(Method::POST, "/api/auth/register", Some(&request))
            .await?;
        self.adopt_tokens(tokens).await
    }

    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let tokens: TokenPair = self
            .pipeline
            .request(Method::POST, "/api/auth/login", Some(&request))
            .await?;
        self.adopt_tokens(tokens).await
    }

    #[instrument(skip(self, id_token))]
    async fn login_with_google(&self, id_token: &str) -> Result<User, ApiError> {
        let request = SocialLoginRequest {
            id_token: id_token.to_string(),
        };
        let tokens: TokenPair = self
            .pipeline
            .request(Method::POST, "/api/auth/google", Some(&request))
            .await?;
        self.adopt_tokens(tokens).await
    }

    #[instrument(skip(self, id_token))]
    async fn login_with_apple(&self, id_token: &str) -> Result<User, ApiError> {
        let request = SocialLoginRequest {
            id_token: id_token.to_string(),
        };
        let tokens: TokenPair = self
            .pipeline
            .request(Method::POST, "/api/auth/apple", Some(&request))
            .await?;
        self.adopt_tokens(tokens).await
    }

    async fn me(&self) -> Result<User, ApiError> {
        self.pipeline
            .request::<(), User>(Method::GET, "/api/auth/me", None)
            .await
    }

    async fn logout(&self) {
        self.session.logout().await;
    }
}
