//! Typed pending writes.
//!
//! Each queued row stores one serialized [`Mutation`]. Replay matches on it
//! exhaustively, so adding an entity type without a replay path does not compile.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::db::{QueueRow, SyncKey};
use crate::models::{GradeDraft, StudentDraft, SubjectDraft};
use crate::remote::{Method, RemoteRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
  Create,
  Update,
  Delete,
  Custom,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Custom => "custom",
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A create/update/delete of one record, with the payload its endpoint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Change<D> {
  Create { id: String, draft: D },
  Update { id: String, draft: D },
  Delete { id: String },
}

impl<D> Change<D> {
  pub fn id(&self) -> &str {
    match self {
      Self::Create { id, .. } | Self::Update { id, .. } | Self::Delete { id } => id,
    }
  }

  pub fn kind(&self) -> OperationKind {
    match self {
      Self::Create { .. } => OperationKind::Create,
      Self::Update { .. } => OperationKind::Update,
      Self::Delete { .. } => OperationKind::Delete,
    }
  }
}

impl<D: Serialize> Change<D> {
  fn to_request(&self, collection: &str) -> Result<RemoteRequest> {
    match self {
      Self::Create { id, draft } => {
        RemoteRequest::post(format!("/{}", collection)).with_json(&CreateBody { id, draft })
      }
      Self::Update { id, draft } => {
        RemoteRequest::put(format!("/{}/{}", collection, id)).with_json(draft)
      }
      Self::Delete { id } => Ok(RemoteRequest::delete(format!("/{}/{}", collection, id))),
    }
  }
}

/// Creates carry the client-chosen id next to the draft fields.
#[derive(Serialize)]
struct CreateBody<'a, D> {
  id: &'a str,
  #[serde(flatten)]
  draft: &'a D,
}

/// Any other write that must survive being offline (attendance, password change, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomMutation {
  /// Short name, becomes part of the queue key (no `:`)
  pub name: String,
  pub record_id: String,
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
}

/// A write waiting for the server, tagged by entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "change", rename_all = "lowercase")]
pub enum Mutation {
  Student(Change<StudentDraft>),
  Grade(Change<GradeDraft>),
  Subject(Change<SubjectDraft>),
  Custom(CustomMutation),
}

impl Mutation {
  /// Queue table name; matches the entity type of the local record.
  pub fn table(&self) -> String {
    match self {
      Self::Student(_) => "students".to_string(),
      Self::Grade(_) => "grades".to_string(),
      Self::Subject(_) => "subjects".to_string(),
      Self::Custom(custom) => format!("custom_{}", custom.name.replace(':', "_")),
    }
  }

  pub fn record_id(&self) -> &str {
    match self {
      Self::Student(change) => change.id(),
      Self::Grade(change) => change.id(),
      Self::Subject(change) => change.id(),
      Self::Custom(custom) => &custom.record_id,
    }
  }

  pub fn operation(&self) -> OperationKind {
    match self {
      Self::Student(change) => change.kind(),
      Self::Grade(change) => change.kind(),
      Self::Subject(change) => change.kind(),
      Self::Custom(_) => OperationKind::Custom,
    }
  }

  pub fn sync_key(&self) -> SyncKey {
    SyncKey::new(self.table(), self.record_id(), self.operation().as_str())
  }

  /// The request that applies this mutation on the server.
  pub fn to_request(&self) -> Result<RemoteRequest> {
    match self {
      Self::Student(change) => change.to_request("students"),
      Self::Grade(change) => change.to_request("grades"),
      Self::Subject(change) => change.to_request("subjects"),
      Self::Custom(custom) => {
        let request = RemoteRequest::new(custom.method, custom.path.clone());
        match &custom.body {
          Some(body) => request.with_json(body),
          None => Ok(request),
        }
      }
    }
  }

  /// Entity whose local row should be flagged synced once this is confirmed.
  pub fn synced_entity(&self) -> Option<(&'static str, &str)> {
    match self {
      Self::Student(Change::Delete { .. })
      | Self::Grade(Change::Delete { .. })
      | Self::Subject(Change::Delete { .. })
      | Self::Custom(_) => None,
      Self::Student(change) => Some(("students", change.id())),
      Self::Grade(change) => Some(("grades", change.id())),
      Self::Subject(change) => Some(("subjects", change.id())),
    }
  }

  pub fn to_payload(&self) -> Result<String> {
    serde_json::to_string(self).map_err(|e| eyre!("Failed to serialize mutation: {}", e))
  }
}

impl QueueRow {
  /// Decode the stored payload.
  pub fn mutation(&self) -> Result<Mutation> {
    serde_json::from_str(&self.payload)
      .map_err(|e| eyre!("Unreadable payload for queued mutation {}: {}", self.key, e))
  }
}
