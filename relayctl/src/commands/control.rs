//! Thin client for a running relay's control API.

use std::time::Duration;

use relay_core::{ControlResponse, StatusReport};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;

use crate::{AppError, Result};

// Long enough to cover a stop that escalates to a forced kill.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ControlClient {
    http: Client,
    base: String,
}

impl ControlClient {
    pub fn new(base: &str) -> Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn start(&self, rtsp_url: &str) -> Result<ControlResponse> {
        let request = self
            .http
            .post(self.endpoint("/api/stream/start"))
            .json(&json!({ "rtsp_url": rtsp_url }));
        self.control(request).await
    }

    pub async fn stop(&self) -> Result<ControlResponse> {
        self.control(self.http.post(self.endpoint("/api/stream/stop")))
            .await
    }

    pub async fn restart(&self) -> Result<ControlResponse> {
        self.control(self.http.post(self.endpoint("/api/stream/restart")))
            .await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let response = self
            .http
            .get(self.endpoint("/api/stream/status"))
            .send()
            .await?;
        let response = reject_failure(response).await?;
        Ok(response.json().await?)
    }

    async fn control(&self, request: RequestBuilder) -> Result<ControlResponse> {
        let response = reject_failure(request.send().await?).await?;
        Ok(response.json().await?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

async fn reject_failure(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await?;
    let message = serde_json::from_str::<ControlResponse>(&text)
        .map(|body| body.message)
        .unwrap_or(text);
    Err(AppError::Rejected {
        status: status.as_u16(),
        message,
    })
}
