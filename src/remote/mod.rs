//! Boundary to the school server.
//!
//! Every endpoint answers with the same envelope `{success, data, message}`.
//! The core only relies on that envelope; endpoint shapes are the
//! repositories' business.

mod http;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use http::HttpRemoteClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
  /// Raw file body, sent as POST
  Upload,
}

/// File attached to an upload request
#[derive(Clone, PartialEq, Eq)]
pub struct Upload {
  pub file_name: String,
  pub content_type: String,
  pub bytes: Vec<u8>,
}

impl fmt::Debug for Upload {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Upload")
      .field("file_name", &self.file_name)
      .field("content_type", &self.content_type)
      .field("len", &self.bytes.len())
      .finish()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
  pub method: Method,
  pub path: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub upload: Option<Upload>,
}

impl RemoteRequest {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      query: Vec::new(),
      body: None,
      upload: None,
    }
  }

  pub fn get(path: impl Into<String>) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: impl Into<String>) -> Self {
    Self::new(Method::Post, path)
  }

  pub fn put(path: impl Into<String>) -> Self {
    Self::new(Method::Put, path)
  }

  pub fn patch(path: impl Into<String>) -> Self {
    Self::new(Method::Patch, path)
  }

  pub fn delete(path: impl Into<String>) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn upload(path: impl Into<String>, upload: Upload) -> Self {
    Self {
      upload: Some(upload),
      ..Self::new(Method::Upload, path)
    }
  }

  pub fn with_query(mut self, pairs: Vec<(String, String)>) -> Self {
    self.query.extend(pairs);
    self
  }

  pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
    self.body =
      Some(serde_json::to_value(body).map_err(|e| eyre!("Failed to serialize request body: {}", e))?);
    Ok(self)
  }
}

/// Uniform server envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
  pub success: bool,
  pub data: Option<T>,
  #[serde(default)]
  pub message: Option<String>,
  /// HTTP status, when the transport has one
  #[serde(skip)]
  pub status: Option<u16>,
}

impl<T> ApiResponse<T> {
  pub fn ok(data: T) -> Self {
    Self {
      success: true,
      data: Some(data),
      message: None,
      status: Some(200),
    }
  }

  pub fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
    Self {
      success: false,
      data: None,
      message: Some(message.into()),
      status,
    }
  }

  /// Turn the envelope into the payload, or a [`RemoteRejection`] report.
  pub fn into_result(self) -> Result<T> {
    if !self.success {
      return Err(self.rejection());
    }
    match self.data {
      Some(data) => Ok(data),
      None => Err(
        RemoteRejection {
          status: self.status,
          message: self
            .message
            .unwrap_or_else(|| "server returned no data".to_string()),
        }
        .into(),
      ),
    }
  }

  /// The refusal carried by an unsuccessful envelope.
  fn rejection(self) -> color_eyre::Report {
    RemoteRejection {
      status: self.status,
      message: self
        .message
        .unwrap_or_else(|| "request rejected by server".to_string()),
    }
    .into()
  }
}

impl ApiResponse<Value> {
  /// Decode `data` into a concrete type.
  pub fn decode<U: DeserializeOwned>(self) -> Result<ApiResponse<U>> {
    let data = self
      .data
      .map(serde_json::from_value)
      .transpose()
      .map_err(|e| eyre!("Failed to decode response data: {}", e))?;
    Ok(ApiResponse {
      success: self.success,
      data,
      message: self.message,
      status: self.status,
    })
  }

  /// Success check for endpoints whose `data` is irrelevant (e.g. delete).
  pub fn into_unit(self) -> Result<()> {
    if self.success {
      Ok(())
    } else {
      Err(self.rejection())
    }
  }
}

/// The server answered, and said no.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRejection {
  pub status: Option<u16>,
  pub message: String,
}

impl RemoteRejection {
  pub fn is_auth_failure(&self) -> bool {
    matches!(self.status, Some(401) | Some(403))
  }

  /// 4xx: the request itself was refused, as opposed to the server failing.
  pub fn is_client_error(&self) -> bool {
    self.status.is_some_and(|status| (400..500).contains(&status))
  }
}

impl fmt::Display for RemoteRejection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.status {
      Some(status) => write!(f, "{} (HTTP {})", self.message, status),
      None => write!(f, "{}", self.message),
    }
  }
}

impl std::error::Error for RemoteRejection {}

/// Whether a report produced by the remote layer is a confirmed auth failure.
pub fn is_auth_failure(report: &color_eyre::Report) -> bool {
  report
    .downcast_ref::<RemoteRejection>()
    .is_some_and(RemoteRejection::is_auth_failure)
}

/// Transport to the server.
///
/// `Err` means the request never got an answer (network, timeout, bad body);
/// a server refusal comes back as `Ok` with `success == false`.
#[async_trait]
pub trait RemoteClient: Send + Sync {
  async fn send(&self, request: RemoteRequest) -> Result<ApiResponse<Value>>;

  /// Bearer token attached to subsequent requests.
  fn set_token(&self, token: Option<String>);

  fn has_token(&self) -> bool;
}

/// Send `request` and decode the payload as `T`.
pub async fn call<T: DeserializeOwned>(
  client: &dyn RemoteClient,
  request: RemoteRequest,
) -> Result<T> {
  let response = client.send(request).await?;
  // A refusal keeps its status even when `data` is not a `T`
  if !response.success {
    return Err(response.rejection());
  }
  response.decode::<T>()?.into_result()
}

/// Send `request` and only check that the server accepted it.
pub async fn call_unit(client: &dyn RemoteClient, request: RemoteRequest) -> Result<()> {
  client.send(request).await?.into_unit()
}
