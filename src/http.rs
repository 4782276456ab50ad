//! HTTP transport.
//!
//! The gateway accepts telegrams as the `protocol` query parameter of
//! `GET /protocol.xml` and answers with an XML document.

use crate::{Gateway, Transport};
use log::trace;
use std::time::Duration;

/// Error type of [`HttpTransport`].
pub type HttpError = reqwest::Error;

/// Connection settings.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct HttpConfig {
    /// Base URL of the gateway, without trailing path.
    pub base_url: String,
    /// Timeout of a single request.
    pub timeout: Duration,
}

impl HttpConfig {
    /// Creates settings for a gateway URL using the default timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/protocol.xml", self.base_url.trim_end_matches('/'))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.99.198".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Transport sending telegrams via HTTP.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Creates a transport for the configured gateway.
    pub fn new(config: &HttpConfig) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
        })
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    type Error = HttpError;

    async fn request(&mut self, frame: &str) -> Result<String, Self::Error> {
        trace!("GET {}?protocol={frame}", self.endpoint);

        self.client
            .get(&self.endpoint)
            .query(&[("protocol", frame)])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

/// Creates a gateway client communicating via HTTP.
///
/// No request is sent until the first exchange.
pub fn connect(config: &HttpConfig) -> Result<Gateway<HttpTransport>, HttpError> {
    Ok(Gateway::new(HttpTransport::new(config)?))
}
