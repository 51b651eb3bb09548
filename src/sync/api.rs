use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Session, Trial};

/// Session metadata pushed ahead of a session's first trial batch.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSyncPayload {
    pub session: Session,
    pub device_id: String,
    pub study_id: String,
}

/// One session's pending trials, delivered as a batch.
#[derive(Debug, Clone, Serialize)]
pub struct TrialSyncPayload {
    pub trials: Vec<Trial>,
    pub session_id: String,
    pub device_id: String,
}

/// Success/error envelope every collector endpoint responds with.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy" && self.database == "connected"
    }
}

/// The remote collector, seen from the coordinator. Delivery is
/// at-least-once: the collector is expected to be idempotent on trial
/// id, so a retried batch after a mid-sync crash is harmless.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn post_session(&self, payload: &SessionSyncPayload) -> Result<()>;
    async fn post_trials(&self, payload: &TrialSyncPayload) -> Result<()>;
    async fn health(&self) -> Result<HealthResponse>;
}

/// JSON-over-HTTP transport against the study collector.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build sync HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<T: Serialize>(&self, path: &str, payload: &T) -> Result<()> {
        let response = self
            .client
            .post(self.url(path))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("POST {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("POST {path} returned {status}");
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .with_context(|| format!("POST {path} returned an unparsable envelope"))?;
        if !envelope.success {
            return Err(anyhow!(
                "POST {path} rejected: {}",
                envelope.error.as_deref().unwrap_or("unspecified error")
            ));
        }

        Ok(())
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn post_session(&self, payload: &SessionSyncPayload) -> Result<()> {
        self.post_json("/api/sessions", payload).await
    }

    async fn post_trials(&self, payload: &TrialSyncPayload) -> Result<()> {
        self.post_json("/api/trials", payload).await
    }

    async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .client
            .get(self.url("/api/health"))
            .send()
            .await
            .context("GET /api/health failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("GET /api/health returned {status}");
        }

        response
            .json()
            .await
            .context("GET /api/health returned an unparsable body")
    }
}
