//! Test doubles shared by the router, drainer and HTTP tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;

use crate::entity::EntityKind;
use crate::store::{LocalStore, Mutation, QueueId, QueuedMutation};
use crate::transport::{Request, Response, ResponseSource, Transport};

type Handler = Box<dyn Fn(&Request) -> Result<Response> + Send + Sync>;

/// Transport that records every request and answers from a closure.
pub struct ScriptedTransport {
  requests: Mutex<Vec<Request>>,
  handler: Handler,
  delay: Option<Duration>,
}

impl ScriptedTransport {
  pub fn new(handler: impl Fn(&Request) -> Result<Response> + Send + Sync + 'static) -> Self {
    Self {
      requests: Mutex::new(Vec::new()),
      handler: Box::new(handler),
      delay: None,
    }
  }

  /// Always answer with `status` and `body`.
  pub fn responding(status: u16, body: Value) -> Self {
    Self::new(move |_| Ok(json_response(status, body.clone())))
  }

  /// Sleep before answering each request.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn send(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    (self.handler)(request)
  }
}

pub fn json_response(status: u16, body: Value) -> Response {
  let mut headers = HeaderMap::new();
  headers.insert("x-request-id", "abc123".parse().unwrap());
  Response {
    status: StatusCode::from_u16(status).unwrap(),
    headers,
    body: serde_json::to_vec(&body).unwrap(),
    source: ResponseSource::Network,
  }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl LocalStore for FailingStore {
  fn replace_collection(&self, _kind: EntityKind, _records: &[Value]) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn read_collection(&self, _kind: EntityKind) -> Result<Vec<Value>> {
    Err(eyre!("disk full"))
  }

  fn refreshed_at(&self, _kind: EntityKind) -> Result<Option<DateTime<Utc>>> {
    Err(eyre!("disk full"))
  }

  fn enqueue(&self, _mutation: &Mutation) -> Result<QueueId> {
    Err(eyre!("disk full"))
  }

  fn list_queue(&self) -> Result<Vec<QueuedMutation>> {
    Err(eyre!("disk full"))
  }

  fn queue_len(&self) -> Result<usize> {
    Err(eyre!("disk full"))
  }

  fn remove_queued(&self, _id: QueueId) -> Result<()> {
    Err(eyre!("disk full"))
  }
}

/// Poll `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
  for _ in 0..100 {
    if condition() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  condition()
}

/// Accept one HTTP connection on a local port, answer it with the raw
/// `response`, and yield the raw request that was received.
pub async fn serve_once(response: &'static str) -> (Url, JoinHandle<String>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let base = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();

  let server = tokio::spawn(async move {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut raw = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
      let n = socket.read(&mut buf).await.unwrap();
      if n == 0 {
        break;
      }
      raw.extend_from_slice(&buf[..n]);

      if let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
        let head = String::from_utf8_lossy(&raw[..end]).to_lowercase();
        let body_len = head
          .lines()
          .find_map(|line| line.strip_prefix("content-length:"))
          .and_then(|len| len.trim().parse::<usize>().ok())
          .unwrap_or(0);
        if raw.len() >= end + 4 + body_len {
          break;
        }
      }
    }

    socket.write_all(response.as_bytes()).await.unwrap();
    let _ = socket.shutdown().await;
    String::from_utf8_lossy(&raw).into_owned()
  });

  (base, server)
}
