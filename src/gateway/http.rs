use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::gateway::{GatewayError, OrderSource};
use crate::models::order::OrderEvent;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Order service client over its public HTTP API.
#[derive(Clone)]
pub struct HttpOrderSource {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpOrderSource {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| GatewayError::Request(format!("invalid base url {base_url}: {err}")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| GatewayError::Request(format!("failed to build http client: {err}")))?;

        Ok(Self { base_url, client })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Request(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| GatewayError::Decode(err.to_string()))
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.is_connect() {
        GatewayError::Connect(err.to_string())
    } else {
        GatewayError::Request(err.to_string())
    }
}

#[async_trait]
impl OrderSource for HttpOrderSource {
    async fn orders_since(&self, cursor: DateTime<Utc>) -> Result<Vec<OrderEvent>, GatewayError> {
        let mut url = self.endpoint(&["public", "api", "v1", "orders"])?;
        url.query_pairs_mut()
            .append_pair("from", &cursor.to_rfc3339_opts(SecondsFormat::Secs, true));

        self.get_json(url).await
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderEvent, GatewayError> {
        let url = self.endpoint(&["public", "api", "v1", "order", order_id])?;
        self.get_json(url).await
    }
}
