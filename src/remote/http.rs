use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use url::Url;

use super::{ApiResponse, Method, RemoteClient, RemoteRequest};

/// HTTP client for the school API
pub struct HttpRemoteClient {
  client: reqwest::Client,
  base_url: Url,
  token: RwLock<Option<String>>,
}

impl HttpRemoteClient {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
    // Url::join drops the last path segment unless the base ends with '/'
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url =
      Url::parse(&normalized).map_err(|e| eyre!("Invalid API base URL '{}': {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token: RwLock::new(None),
    })
  }

  fn url_for(&self, request: &RemoteRequest) -> Result<Url> {
    let mut url = self
      .base_url
      .join(request.path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid request path '{}': {}", request.path, e))?;
    if !request.query.is_empty() {
      url.query_pairs_mut().extend_pairs(&request.query);
    }
    Ok(url)
  }

  fn token(&self) -> Option<String> {
    self.token.read().map(|t| t.clone()).unwrap_or_default()
  }
}

impl std::fmt::Debug for HttpRemoteClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpRemoteClient")
      .field("base_url", &self.base_url.as_str())
      .field("authenticated", &self.has_token())
      .finish()
  }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
  async fn send(&self, request: RemoteRequest) -> Result<ApiResponse<Value>> {
    let url = self.url_for(&request)?;

    let mut builder = match request.method {
      Method::Get => self.client.get(url),
      Method::Post | Method::Upload => self.client.post(url),
      Method::Put => self.client.put(url),
      Method::Patch => self.client.patch(url),
      Method::Delete => self.client.delete(url),
    };

    if let Some(token) = self.token() {
      builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }

    if let Some(upload) = &request.upload {
      builder = builder
        .header(CONTENT_TYPE, upload.content_type.as_str())
        .header(
          CONTENT_DISPOSITION,
          format!("attachment; filename=\"{}\"", upload.file_name.replace('"', "")),
        )
        .body(upload.bytes.clone());
    } else if let Some(body) = &request.body {
      let bytes =
        serde_json::to_vec(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?;
      builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("{:?} {} failed: {}", request.method, request.path, e))?;

    let status = response.status();
    let bytes = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response for {}: {}", request.path, e))?;

    tracing::debug!(
      method = ?request.method,
      path = %request.path,
      status = status.as_u16(),
      "remote call finished"
    );

    Ok(envelope_from(status.as_u16(), status.is_success(), &bytes))
  }

  fn set_token(&self, token: Option<String>) {
    if let Ok(mut slot) = self.token.write() {
      *slot = token;
    }
  }

  fn has_token(&self) -> bool {
    self.token().is_some()
  }
}

/// Interpret a response body. Bodies that are not an envelope are wrapped in one.
fn envelope_from(status: u16, is_success: bool, bytes: &[u8]) -> ApiResponse<Value> {
  if let Ok(mut envelope) = serde_json::from_slice::<ApiResponse<Value>>(bytes) {
    envelope.status = Some(status);
    // A 4xx/5xx never counts as success, whatever the body claims
    envelope.success = envelope.success && is_success;
    return envelope;
  }

  match (is_success, serde_json::from_slice::<Value>(bytes)) {
    (true, Ok(value)) => ApiResponse {
      status: Some(status),
      ..ApiResponse::ok(value)
    },
    (true, Err(_)) if bytes.is_empty() => ApiResponse {
      status: Some(status),
      ..ApiResponse::ok(Value::Null)
    },
    (true, Err(e)) => ApiResponse::rejected(Some(status), format!("Unreadable response body: {}", e)),
    (false, _) => {
      let text = String::from_utf8_lossy(bytes);
      let message = if text.trim().is_empty() {
        format!("HTTP {}", status)
      } else {
        text.chars().take(200).collect()
      };
      ApiResponse::rejected(Some(status), message)
    }
  }
}
