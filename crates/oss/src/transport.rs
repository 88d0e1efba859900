//! reqwest-backed transport
//!
//! Sends one signed request and returns the normalized response. Status
//! codes are never judged here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use oc_core::{Error, HttpRequest, HttpResponse, Method, Result, Transport};

/// Transport over a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("osscmd/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::General(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Put => reqwest::Method::PUT,
        Method::Post => reqwest::Method::POST,
        Method::Head => reqwest::Method::HEAD,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self.client.request(reqwest_method(method), &url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(body).send().await.map_err(|e| {
            if e.is_builder() {
                Error::InvalidArgument(format!("Malformed request to {url}: {e}"))
            } else {
                Error::Connection(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let mut flat = BTreeMap::new();
        for (name, value) in response.headers() {
            flat.entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Connection(format!("Failed to read response body: {e}")))?
            .to_vec();

        debug!(%method, %url, status, bytes = body.len(), "http exchange");

        Ok(HttpResponse {
            status,
            headers: flat,
            body,
        })
    }
}
