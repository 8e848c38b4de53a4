use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Entity;

/// A taught subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
  pub id: String,
  pub name: String,
  pub code: String,
  pub teacher_id: Option<String>,
  pub coefficient: f64,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub is_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectDraft {
  pub name: String,
  pub code: String,
  pub teacher_id: Option<String>,
  pub coefficient: f64,
}

impl Subject {
  pub fn from_draft(id: String, draft: SubjectDraft, now: DateTime<Utc>) -> Self {
    Self {
      id,
      name: draft.name,
      code: draft.code,
      teacher_id: draft.teacher_id,
      coefficient: draft.coefficient,
      created_at: now,
      updated_at: now,
      is_synced: false,
    }
  }

  pub fn apply(&mut self, draft: SubjectDraft, now: DateTime<Utc>) {
    self.name = draft.name;
    self.code = draft.code;
    self.teacher_id = draft.teacher_id;
    self.coefficient = draft.coefficient;
    self.updated_at = now;
    self.is_synced = false;
  }
}

impl Entity for Subject {
  fn entity_type() -> &'static str {
    "subjects"
  }

  fn id(&self) -> &str {
    &self.id
  }

  fn created_at(&self) -> DateTime<Utc> {
    self.created_at
  }

  fn updated_at(&self) -> DateTime<Utc> {
    self.updated_at
  }

  fn is_synced(&self) -> bool {
    self.is_synced
  }

  fn set_synced(&mut self, synced: bool) {
    self.is_synced = synced;
  }
}
