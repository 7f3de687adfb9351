//! HTTP transport seam.
//!
//! The pipeline talks to the network only through [`HttpTransport`], which
//! keeps retry/classification logic testable with stub transports. The
//! reqwest implementation keeps one client per proxy endpoint so cookie jars
//! and connection pools stay bound to a single egress identity.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::modules::proxy::ProxyEntry;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Outbound request handed to a transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub proxy: Option<ProxyEntry>,
    pub timeout: Duration,
}

/// Response as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: Url,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Reqwest-backed transport with a client pool keyed by proxy URL.
#[derive(Debug, Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self, proxy: Option<&ProxyEntry>) -> Result<Client, TransportError> {
        let key = proxy.map(ProxyEntry::url);
        let mut guard = self.clients.lock().await;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder().cookie_store(true).gzip(true).brotli(true);
        if let Some(endpoint) = &key {
            builder = builder.proxy(reqwest::Proxy::all(endpoint.as_str())?);
        }

        let client = builder.build()?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client(request.proxy.as_ref()).await?;

        let mut builder = client
            .request(request.method, request.url.as_str())
            .headers(request.headers)
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        Ok(TransportResponse {
            status,
            headers,
            body,
            url,
        })
    }
}
