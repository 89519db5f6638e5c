//! Client for the order execution service.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::debug;

use super::types::{TradeRequest, TradeResponse};

/// Client for `POST /trade`.
pub struct ExecutionClient {
    client: Client,
    base_url: String,
}

impl ExecutionClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn submit(&self, request: &TradeRequest) -> Result<TradeResponse> {
        let url = format!("{}/trade", self.base_url);
        debug!(url = %url, symbol = %request.symbol, side = %request.side, "Submitting trade");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to reach execution service")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Trade request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse trade response")
    }
}
