//! Domain records stored locally and exchanged with the server.

mod grade;
mod student;
mod subject;
mod user;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

pub use grade::{Grade, GradeDraft, GradeFilter, GradeStatistics};
pub use student::{Gender, Student, StudentDraft, StudentFilter, StudentStatistics, StudentStatus};
pub use subject::{Subject, SubjectDraft};
pub use user::{Credentials, Session, User};

/// Trait for records kept in the local `entities` table.
///
/// Implementors must provide a stable id; the entity type names the table
/// partition and the server collection.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Entity type name for storage organization (e.g., "students")
  fn entity_type() -> &'static str;

  fn id(&self) -> &str;

  fn created_at(&self) -> DateTime<Utc>;

  fn updated_at(&self) -> DateTime<Utc>;

  fn is_synced(&self) -> bool;

  fn set_synced(&mut self, synced: bool);
}

/// One page of a list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub total: usize,
  pub page: u32,
  pub limit: u32,
}

impl<T: Clone> Page<T> {
  /// Slice an already-filtered list. Pages are 1-based; page 0 is treated as 1.
  pub fn paginate(all: &[T], page: u32, limit: u32) -> Self {
    let page = page.max(1);
    let start = (page as usize - 1).saturating_mul(limit as usize);
    let items = all
      .iter()
      .skip(start)
      .take(limit as usize)
      .cloned()
      .collect();
    Self {
      items,
      total: all.len(),
      page,
      limit,
    }
  }
}

static LOCAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Client-side id for a record created before the server has seen it.
pub fn local_id(entity_type: &str, seed: &[u8], now: DateTime<Utc>) -> String {
  let counter = LOCAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(entity_type.as_bytes());
  hasher.update(seed);
  hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
  hasher.update(counter.to_le_bytes());
  hasher.update(std::process::id().to_le_bytes());
  let digest = hex::encode(hasher.finalize());

  format!("local-{}", &digest[..24])
}

pub fn is_local_id(id: &str) -> bool {
  id.starts_with("local-")
}
