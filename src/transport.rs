//! Request/response types and the HTTP transport that talks to the CRM API.

use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::ApiConfig;

/// A logical data request issued by the application.
#[derive(Debug, Clone)]
pub struct Request {
  pub path: String,
  pub method: Method,
  pub headers: HeaderMap,
  pub body: Option<String>,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      method,
      headers: HeaderMap::new(),
      body: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::GET, path)
  }

  /// Attach a raw text body.
  pub fn with_body(mut self, body: impl Into<String>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Attach `value` as a JSON body and set the content type.
  pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self> {
    let body =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
    self
      .headers
      .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    self.body = Some(body);
    Ok(self)
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the server
  Network,
  /// Synthesized from the local cache while offline
  Cache,
  /// Write accepted into the offline queue
  Queued,
  /// Synthesized refusal: nothing cached, or unsupported offline
  Unavailable,
}

/// A response as seen by the application.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  /// Build a JSON response that did not come from the network.
  pub fn synthesized(status: StatusCode, body: &Value, source: ResponseSource) -> Result<Self> {
    let body =
      serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize response body: {}", e))?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(Self {
      status,
      headers,
      body,
      source,
    })
  }

  /// True for 2xx statuses.
  pub fn ok(&self) -> bool {
    self.status.is_success()
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
    serde_json::from_slice(&self.body).map_err(|e| eyre!("Failed to parse response body: {}", e))
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// The underlying fetch-like transport.
///
/// Non-2xx statuses are returned as responses. Only failures to obtain a
/// response at all (DNS, connect, timeout) are errors.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &Request) -> Result<Response>;
}

/// Transport that sends requests to the CRM API with reqwest.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url: config.base_url.clone(),
    })
  }

  /// Base URL followed directly by `path`.
  fn url_for(&self, path: &str) -> Result<Url> {
    let joined = format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path);
    Url::parse(&joined).map_err(|e| eyre!("Invalid request URL {}: {}", joined, e))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn send(&self, request: &Request) -> Result<Response> {
    let url = self.url_for(&request.path)?;

    // JSON unless the request says otherwise. Repeated headers are kept.
    let mut headers = request.headers.clone();
    headers
      .entry(CONTENT_TYPE)
      .or_insert(HeaderValue::from_static("application/json"));

    let mut builder = self
      .client
      .request(request.method.clone(), url.clone())
      .headers(headers);
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", request.method, url, e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?;

    Ok(Response {
      status,
      headers,
      body: body.to_vec(),
      source: ResponseSource::Network,
    })
  }
}
