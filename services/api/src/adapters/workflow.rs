//! services/api/src/adapters/workflow.rs
//!
//! This module contains the adapter for the recipe generation workflow (an n8n
//! webhook). It implements the `WorkflowTrigger` port from the `core` crate.

use async_trait::async_trait;
use culinary_core::domain::WorkflowRequest;
use culinary_core::ports::{PortResult, WorkflowTrigger};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::http::{ensure_success, transport_error};

/// The JSON body the workflow's webhook node expects.
#[derive(Serialize)]
struct TriggerBody<'a> {
    ingredients: &'a str,
    user_id: Uuid,
}

/// An adapter that implements the `WorkflowTrigger` port with a webhook POST.
#[derive(Clone)]
pub struct WebhookWorkflowAdapter {
    client: reqwest::Client,
    url: String,
}

impl WebhookWorkflowAdapter {
    /// Creates a new `WebhookWorkflowAdapter`. Timeouts are configured on `client`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl WorkflowTrigger for WebhookWorkflowAdapter {
    async fn trigger(&self, request: &WorkflowRequest) -> PortResult<()> {
        let body = TriggerBody {
            ingredients: &request.ingredients,
            user_id: request.user_id,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = ensure_success(response).await?;
        info!(
            "Workflow accepted generation for user {} ({})",
            request.user_id,
            response.status()
        );
        Ok(())
    }
}
