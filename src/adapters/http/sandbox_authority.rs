//! HTTP client for a sandbox runtime acting as external authority.

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WorkUnit;
use crate::domain::ports::{ExternalAuthority, RemoteState};

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

/// Polls `GET <base_url>/tasks/<id>/status`.
pub struct HttpSandboxAuthority {
    http_client: ReqwestClient,
    base_url: String,
}

impl HttpSandboxAuthority {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> DomainResult<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| DomainError::AuthorityUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Map a sandbox status string onto the reconciler's view.
pub fn classify_status(status: &str) -> RemoteState {
    match status.to_lowercase().as_str() {
        "running" | "pending" | "processing" | "queued" | "starting" => RemoteState::Active,
        "completed" | "complete" | "done" | "succeeded" | "success" | "failed" | "error"
        | "stopped" | "cancelled" | "canceled" | "killed" | "timeout" => RemoteState::Terminal,
        _ => RemoteState::Unknown,
    }
}

#[async_trait]
impl ExternalAuthority for HttpSandboxAuthority {
    async fn poll(&self, unit: &WorkUnit) -> DomainResult<RemoteState> {
        let url = format!("{}/tasks/{}/status", self.base_url, unit.id);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DomainError::AuthorityUnavailable(format!("GET {url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(RemoteState::Unknown);
        }
        if !status.is_success() {
            return Err(DomainError::AuthorityUnavailable(format!("GET {url} returned {status}")));
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| DomainError::AuthorityUnavailable(format!("unreadable status from {url}: {e}")))?;
        Ok(classify_status(&body.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn unit(id: i64) -> WorkUnit {
        WorkUnit::new("sandbox_task", id)
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status("RUNNING"), RemoteState::Active);
        assert_eq!(classify_status("failed"), RemoteState::Terminal);
        assert_eq!(classify_status("completed"), RemoteState::Terminal);
        assert_eq!(classify_status("mystery"), RemoteState::Unknown);
    }

    #[tokio::test]
    async fn test_poll_reports_remote_state() {
        let mut server = Server::new_async().await;
        let _running = server
            .mock("GET", "/tasks/1/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "running"}"#)
            .create_async()
            .await;
        let _done = server
            .mock("GET", "/tasks/2/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "completed"}"#)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/tasks/3/status")
            .with_status(404)
            .create_async()
            .await;

        let authority = HttpSandboxAuthority::new(server.url(), Duration::from_secs(5)).unwrap();
        assert_eq!(authority.poll(&unit(1)).await.unwrap(), RemoteState::Active);
        assert_eq!(authority.poll(&unit(2)).await.unwrap(), RemoteState::Terminal);
        assert_eq!(authority.poll(&unit(3)).await.unwrap(), RemoteState::Unknown);
    }

    #[tokio::test]
    async fn test_poll_server_error_is_not_a_state() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/tasks/5/status")
            .with_status(503)
            .create_async()
            .await;

        let authority = HttpSandboxAuthority::new(server.url(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            authority.poll(&unit(5)).await,
            Err(DomainError::AuthorityUnavailable(_))
        ));
    }
}
