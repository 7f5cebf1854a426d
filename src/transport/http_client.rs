use reqwest::{header, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::error::ApiError;

/// Raw HTTP transport for the gift API.
///
/// Sends exactly one request per call and classifies the outcome into the
/// [`ApiError`] taxonomy. Knows nothing about sessions or refresh; attaching
/// the right bearer token and recovering from a 401 is the pipeline's job.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

/// Standard error payload the server emits on failures.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Sends a single request, optionally authenticated, and deserializes
    /// the response body. An empty success body is read as JSON `null` so
    /// `T = ()` works for 204 responses.
    #[instrument(skip(self, bearer, body))]
    pub async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        body: Option<&B>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Sending {} request to {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        let body_text = response.text().await?;

        debug!("Response status: {}", status);

        if status.is_success() {
            let payload = if body_text.trim().is_empty() {
                "null"
            } else {
                body_text.as_str()
            };
            Ok(serde_json::from_str(payload)?)
        } else if status == StatusCode::UNAUTHORIZED {
            debug!("Request rejected with 401");
            Err(ApiError::Unauthorized)
        } else {
            error!("API request failed. Status: {}, Body: {}", status, body_text);
            Err(ApiError::Api {
                status,
                message: Self::error_message(&body_text),
            })
        }
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .map(|b| b.error)
            .unwrap_or_else(|_| body.to_string())
    }
}
