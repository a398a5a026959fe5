//! API client for the agent's HTTP endpoints

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tuner_lib::{HealthResponse, SessionReport};
use url::Url;

/// API client for a running tuner agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid agent endpoint")?;

        Ok(Self { client, base_url })
    }

    /// GET `path`, accepting a JSON body with any of the `accepted` statuses
    async fn get_accepting<T: DeserializeOwned>(
        &self,
        path: &str,
        accepted: &[StatusCode],
    ) -> Result<(StatusCode, T)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() && !accepted.contains(&status) {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        let body = response.json().await.context("Failed to parse response")?;
        Ok((status, body))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_accepting(path, &[]).await.map(|(_, body)| body)
    }

    pub async fn report(&self) -> Result<SessionReport> {
        self.get("report").await
    }

    /// Component health; an unhealthy agent answers 503 with the same body
    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_accepting("healthz", &[StatusCode::SERVICE_UNAVAILABLE])
            .await
            .map(|(_, body)| body)
    }
}
