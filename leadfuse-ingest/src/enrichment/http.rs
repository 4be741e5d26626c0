// HTTP enrichment client
//
// GET {base_url}/properties/{identity_key}?street=..&city=..&state=..&zip=..
// Rate limited with a token bucket; every request carries connect and total
// timeouts so a slow provider cannot stall an identity group.

use super::{EnrichmentClient, EnrichmentError};
use crate::types::{EnrichmentSnapshot, NormalizedAddress, ObservedAttributes, ObservedContact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use leadfuse_common::config::EnrichmentConfig;
use leadfuse_common::{Error, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::time::Duration;

const API_KEY_HEADER: &str = "X-Api-Key";

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Provider response body
#[derive(Debug, Deserialize)]
struct ProviderProperty {
    #[serde(default)]
    attributes: ObservedAttributes,
    #[serde(default)]
    owner_name: Option<String>,
    #[serde(default)]
    price_hint: Option<f64>,
    #[serde(default)]
    distress_signals: BTreeSet<String>,
    #[serde(default)]
    contacts: Vec<ObservedContact>,
    #[serde(default)]
    retrieved_at: Option<DateTime<Utc>>,
}

pub struct HttpEnrichmentClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
    rate_limiter: DirectRateLimiter,
}

impl HttpEnrichmentClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout_ms: u64,
        connect_timeout_ms: u64,
        requests_per_second: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .connect_timeout(Duration::from_millis(connect_timeout_ms))
            .user_agent(leadfuse_common::config::get_user_agent())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout_ms,
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
        })
    }

    /// Client from the `[enrichment]` config section
    ///
    /// `None` when enrichment is disabled or no `base_url` is configured.
    pub fn from_config(config: &EnrichmentConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(base_url) = config.base_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            tracing::warn!("Enrichment enabled but no base_url configured; continuing without it");
            return Ok(None);
        };
        Self::new(
            base_url,
            config.api_key.clone(),
            config.timeout_ms,
            config.connect_timeout_ms,
            config.requests_per_second,
        )
        .map(Some)
    }
}

/// Map a non-success status onto an enrichment error
fn status_error(status: StatusCode, identity_key: &str, body: String) -> EnrichmentError {
    match status {
        StatusCode::NOT_FOUND => EnrichmentError::NotFound(identity_key.to_string()),
        StatusCode::TOO_MANY_REQUESTS => EnrichmentError::RateLimited,
        other => EnrichmentError::Api(other.as_u16(), body),
    }
}

#[async_trait]
impl EnrichmentClient for HttpEnrichmentClient {
    async fn fetch_snapshot(
        &self,
        identity: &NormalizedAddress,
    ) -> std::result::Result<EnrichmentSnapshot, EnrichmentError> {
        self.rate_limiter.until_ready().await;

        let key = identity.identity_key.as_str();
        let address = &identity.address;
        let url = format!("{}/properties/{}", self.base_url, key);

        tracing::debug!(identity_key = key, "Querying enrichment provider");

        let mut request = self.client.get(&url).query(&[
            ("street", address.street_line.as_str()),
            ("city", address.city.as_str()),
            ("state", address.state.as_str()),
            ("zip", address.postal_code.as_str()),
        ]);
        if let Some(api_key) = &self.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EnrichmentError::Timeout(self.timeout_ms)
            } else {
                EnrichmentError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, key, body));
        }

        let property: ProviderProperty = response
            .json()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))?;

        Ok(EnrichmentSnapshot {
            identity_key: identity.identity_key.clone(),
            attributes: property.attributes,
            owner_name: property.owner_name,
            price_hint: property.price_hint,
            distress_signals: property.distress_signals,
            contacts: property.contacts,
            retrieved_at: property.retrieved_at.unwrap_or_else(leadfuse_common::time::now),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use crate::types::PropertyField;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_fetch_snapshot_parses_body() {
        let base = serve_once(
            "200 OK",
            r#"{"attributes":{"sqft":"1,820","beds":3},"owner_name":"Pat Lee","distress_signals":["pre-foreclosure"],"retrieved_at":"2024-04-01T00:00:00Z"}"#,
        )
        .await;
        let client = HttpEnrichmentClient::new(base, Some("k".to_string()), 2000, 1000, 10).unwrap();
        let identity = normalize("9 Elm St, Dayton, OH 45402").unwrap();

        let snapshot = client.fetch_snapshot(&identity).await.unwrap();
        assert_eq!(snapshot.identity_key, identity.identity_key);
        assert_eq!(
            snapshot.attributes.get(PropertyField::SquareFeet).and_then(|v| v.as_number()),
            Some(1820.0)
        );
        assert_eq!(snapshot.owner_name.as_deref(), Some("Pat Lee"));
        assert!(snapshot.distress_signals.contains("pre-foreclosure"));
    }

    #[tokio::test]
    async fn test_not_found_maps_to_error() {
        let base = serve_once("404 Not Found", "{}").await;
        let client = HttpEnrichmentClient::new(base, None, 2000, 1000, 10).unwrap();
        let identity = normalize("9 Elm St, Dayton, OH 45402").unwrap();

        let err = client.fetch_snapshot(&identity).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::NotFound(_)));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "k", String::new()),
            EnrichmentError::RateLimited
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "k", "upstream".to_string()),
            EnrichmentError::Api(502, _)
        ));
    }

    #[test]
    fn test_disabled_config_yields_no_client() {
        let config = EnrichmentConfig::default();
        assert!(HttpEnrichmentClient::from_config(&config).unwrap().is_none());

        let config = EnrichmentConfig {
            enabled: true,
            base_url: None,
            ..EnrichmentConfig::default()
        };
        assert!(HttpEnrichmentClient::from_config(&config).unwrap().is_none());
    }
}
