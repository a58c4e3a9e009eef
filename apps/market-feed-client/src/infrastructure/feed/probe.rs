//! Pre-connect HTTP Probe
//!
//! `GET`s the feed's sibling health endpoint before each connection
//! attempt. A failure is treated like a failed connect and goes through the
//! reconnect policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::auth::AuthError;
use crate::application::ports::{HealthProbe, ProbeError};

/// Default probe request timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Derive the health endpoint of a feed: `ws`→`http`, `wss`→`https`,
/// path `/health`, no query.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedScheme`] for non-WebSocket URLs.
pub fn derive_health_url(feed_url: &Url) -> Result<Url, AuthError> {
    let scheme = match feed_url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => return Err(AuthError::UnsupportedScheme(other.to_string())),
    };
    // set_scheme refuses ws→http, so rebuild from the string form.
    let rest = &feed_url.as_str()[feed_url.scheme().len()..];
    let mut url = Url::parse(&format!("{scheme}{rest}"))
        .map_err(|_| AuthError::UnsupportedScheme(feed_url.scheme().to_string()))?;
    url.set_path("/health");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Probe backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    url: Url,
}

impl HttpHealthProbe {
    /// Probe `url` with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Request`] if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Request(e.to_string()))?;
        Ok(Self { client, url })
    }

    /// Probed URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| ProbeError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %self.url, "Health probe passed");
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn health_url_from_secure_feed() {
        let feed = Url::parse("wss://feed.example.com:8443/ws/v1?token=x").unwrap();
        let health = derive_health_url(&feed).unwrap();
        assert_eq!(health.as_str(), "https://feed.example.com:8443/health");
    }

    #[test]
    fn health_url_from_plain_feed() {
        let feed = Url::parse("ws://localhost:3000/stream").unwrap();
        assert_eq!(
            derive_health_url(&feed).unwrap().as_str(),
            "http://localhost:3000/health"
        );
    }

    #[test]
    fn health_url_rejects_http() {
        let feed = Url::parse("http://localhost/stream").unwrap();
        assert!(derive_health_url(&feed).is_err());
    }

    #[tokio::test]
    async fn healthy_endpoint_passes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/health", server.uri())).unwrap();
        let probe = HttpHealthProbe::new(url, DEFAULT_PROBE_TIMEOUT).unwrap();

        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn unhealthy_endpoint_fails_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/health", server.uri())).unwrap();
        let probe = HttpHealthProbe::new(url, DEFAULT_PROBE_TIMEOUT).unwrap();

        assert_eq!(probe.check().await, Err(ProbeError::Status(503)));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/health", server.uri())).unwrap();
        let probe = HttpHealthProbe::new(url, Duration::from_millis(100)).unwrap();

        assert!(matches!(probe.check().await, Err(ProbeError::Request(_))));
    }
}
