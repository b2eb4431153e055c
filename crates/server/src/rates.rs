use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use spendflow_core::currency::{ExchangeRates, RateError, RateProvider};

/// Fetches `{base_url}/{BASE}` and parses the `rates` object of the reply.
/// Requests are bounded by the client timeout.
pub struct HttpRateProvider {
    client: Client,
    base_url: String,
}

impl HttpRateProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    fn url_for(&self, base: &str) -> String {
        format!("{}/{}", self.base_url, base.trim().to_ascii_uppercase())
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn latest(&self, base: &str) -> Result<ExchangeRates, RateError> {
        let response = self
            .client
            .get(self.url_for(base))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| RateError::Transport(error.to_string()))?;
        let body = response.text().await.map_err(|error| RateError::Transport(error.to_string()))?;
        ExchangeRates::from_json(base, &body)
    }
}
