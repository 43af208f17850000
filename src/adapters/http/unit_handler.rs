//! Webhook-style unit handler.
//!
//! POSTs the unit to the service that owns the normal processing path and
//! reads back how many items it handled. The receiving endpoint must be
//! idempotent, exactly like the in-process handler contract.

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ResourceId, TickContext, WorkUnit};
use crate::domain::ports::UnitHandler;

#[derive(Debug, Serialize)]
struct ProcessRequest<'a> {
    job: &'a str,
    kind: &'a str,
    resource_id: ResourceId,
    tick_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessResponse {
    #[serde(default)]
    processed: u64,
}

pub struct HttpUnitHandler {
    http_client: ReqwestClient,
    url: String,
}

impl HttpUnitHandler {
    /// Build a handler posting to `url`. `timeout` should not exceed the
    /// resource lock TTL.
    pub fn new(url: impl Into<String>, timeout: Duration) -> DomainResult<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DomainError::HandlerFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl UnitHandler for HttpUnitHandler {
    async fn process(&self, ctx: &TickContext, unit: &WorkUnit) -> DomainResult<u64> {
        let request = ProcessRequest {
            job: &ctx.job_name,
            kind: &unit.kind,
            resource_id: unit.id,
            tick_id: ctx.tick_id.to_string(),
        };

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DomainError::HandlerFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(DomainError::HandlerFailed(format!("handler returned {status}: {body}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DomainError::HandlerFailed(format!("failed to read response: {e}")))?;
        if body.is_empty() {
            return Ok(0);
        }

        let parsed: ProcessResponse = serde_json::from_slice(&body)?;
        Ok(parsed.processed)
    }
}
