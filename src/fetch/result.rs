use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
  /// Fresh cache entry, no network call made
  Cache,
  /// Fresh data from the server
  Remote,
  /// Local store, server unreachable or failing
  Local,
}

/// Outcome of a read. Network problems end up here, never in an `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult<T> {
  Success {
    data: T,
    source: DataSource,
    message: Option<String>,
  },
  Failure {
    /// Never empty
    message: String,
  },
}

impl<T> FetchResult<T> {
  pub fn success(data: T, source: DataSource) -> Self {
    Self::Success {
      data,
      source,
      message: None,
    }
  }

  pub fn failure(message: impl Into<String>) -> Self {
    let message = message.into();
    Self::Failure {
      message: if message.trim().is_empty() {
        "Request failed".to_string()
      } else {
        message
      },
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Self::Success { .. })
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      Self::Success { data, .. } => Some(data),
      Self::Failure { .. } => None,
    }
  }

  pub fn into_data(self) -> Option<T> {
    match self {
      Self::Success { data, .. } => Some(data),
      Self::Failure { .. } => None,
    }
  }

  pub fn source(&self) -> Option<DataSource> {
    match self {
      Self::Success { source, .. } => Some(*source),
      Self::Failure { .. } => None,
    }
  }

  pub fn message(&self) -> Option<&str> {
    match self {
      Self::Success { message, .. } => message.as_deref(),
      Self::Failure { message } => Some(message),
    }
  }

  pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> FetchResult<U> {
    match self {
      Self::Success {
        data,
        source,
        message,
      } => FetchResult::Success {
        data: f(data),
        source,
        message,
      },
      Self::Failure { message } => FetchResult::Failure { message },
    }
  }

  /// Collapse into a plain `Result` for callers that only care about the data.
  pub fn into_result(self) -> Result<T> {
    match self {
      Self::Success { data, .. } => Ok(data),
      Self::Failure { message } => Err(eyre!(message)),
    }
  }
}
