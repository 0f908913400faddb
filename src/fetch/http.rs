//! HTTP page fetcher implementation
//!
//! This module handles all HTTP requests for the pipeline, including:
//! - Building HTTP clients with the configured user agent and timeouts
//! - Applying endpoint headers and authentication to each page request
//! - Turning transport errors into classified [`FetchFailure`] values
//!
//! Status-code classification happens in the pagination engine, so a
//! fetcher only reports what the server said.

use crate::config::HttpConfig;
use crate::fetch::{Auth, FetchFailure};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{redirect::Policy, Client, Method};
use std::time::Duration;
use url::Url;

/// A single page request, fully resolved
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: Url,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub auth: Auth,
}

/// Raw response for a single page
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// HTTP status code
    pub status: u16,

    /// Response headers (Link, Retry-After, ...)
    pub headers: HeaderMap,

    /// Raw body bytes
    pub body: Vec<u8>,

    /// Final URL after redirects
    pub url: Url,
}

/// Issues one HTTP request per call
///
/// The pagination engine only talks to the network through this trait, which
/// keeps it testable with scripted responses.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, FetchFailure>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The HTTP configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_ingest::config::HttpConfig;
/// use sumi_ingest::fetch::build_http_client;
///
/// let client = build_http_client(&HttpConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(Policy::limited(10))
        .https_only(config.https_only)
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`PageFetcher`] backed by a reqwest client
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
    request_timeout: Duration,
}

impl HttpPageFetcher {
    /// Creates a fetcher from the HTTP configuration
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::with_client(
            build_http_client(config)?,
            Duration::from_secs(config.request_timeout_secs),
        ))
    }

    /// Wraps an existing client, e.g. one shared with other fetchers
    pub fn with_client(client: Client, request_timeout: Duration) -> Self {
        Self {
            client,
            request_timeout,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResponse, FetchFailure> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .timeout(self.request_timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match &request.auth {
            Auth::None => builder,
            Auth::Bearer { token } => builder.bearer_auth(token),
            Auth::Basic { username, password } => builder.basic_auth(username, password.as_ref()),
            Auth::ApiKey { header, value } => builder.header(header.as_str(), value.as_str()),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        Ok(PageResponse {
            status,
            headers,
            body: body.to_vec(),
            url,
        })
    }
}
