use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::application::models::recipient::{
    BulkDeleteRequest, CreateRecipientRequest, Recipient, UpdateRecipientRequest,
};
use crate::error::ApiError;
use crate::transport::RequestPipeline;

/// CRUD over the user's gift recipients. Thin: one pipeline call per
/// operation, errors pass through unchanged.
#[async_trait]
pub trait RecipientService: Send + Sync {
    async fn list(&self) -> Result<Vec<Recipient>, ApiError>;

    async fn create(&self, request: &CreateRecipientRequest) -> Result<Recipient, ApiError>;

    async fn get(&self, id: Uuid) -> Result<Recipient, ApiError>;

    async fn update(
        &self,
        id: Uuid,
        request: &UpdateRecipientRequest,
    ) -> Result<Recipient, ApiError>;

    async fn delete(&self, id: Uuid) -> Result<(), ApiError>;

    async fn bulk_delete(&self, ids: Vec<Uuid>) -> Result<(), ApiError>;
}

pub struct RecipientServiceImpl {
    pipeline: Arc<RequestPipeline>,
}

impl RecipientServiceImpl {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl RecipientService for RecipientServiceImpl {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Recipient>, ApiError> {
        let recipients: Vec<Recipient> = self
            .pipeline
            .request::<(), _>(Method::GET, "/api/recipients", None)
            .await?;
        debug!("Fetched {} recipients", recipients.len());
        Ok(recipients)
    }

    #[instrument(skip(self, request))]
    async fn create(&self, request: &CreateRecipientRequest) -> Result<Recipient, ApiError> {
        let recipient: Recipient = self
            .pipeline
            .request(Method::POST, "/api/recipients", Some(request))
            .await?;
        info!("Created recipient {}", recipient.id);
        Ok(recipient)
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Recipient, ApiError> {
        self.pipeline
            .request::<(), _>(Method::GET, &format!("/api/recipients/{id}"), None)
            .await
    }

    #[instrument(skip(self, request))]
    async fn update(
        &self,
        id: Uuid,
        request: &UpdateRecipientRequest,
    ) -> Result<Recipient, ApiError> {
        self.pipeline
            .request(Method::PUT, &format!("/api/recipients/{id}"), Some(request))
            .await
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        self.pipeline
            .request::<(), ()>(Method::DELETE, &format!("/api/recipients/{id}"), None)
            .await
    }

    #[instrument(skip(self))]
    async fn bulk_delete(&self, ids: Vec<Uuid>) -> Result<(), ApiError> {
        let request = BulkDeleteRequest { ids };
        self.pipeline
            .request::<_, ()>(Method::DELETE, "/api/recipients", Some(&request))
            .await
    }
}
