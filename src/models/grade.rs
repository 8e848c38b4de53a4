use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Entity;

/// A single mark for one student in one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
  pub id: String,
  pub student_id: String,
  pub subject_id: String,
  pub score: f64,
  pub max_score: f64,
  pub term: Option<String>,
  pub remarks: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub is_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeDraft {
  pub student_id: String,
  pub subject_id: String,
  pub score: f64,
  pub max_score: f64,
  pub term: Option<String>,
  pub remarks: Option<String>,
}

impl Grade {
  pub fn from_draft(id: String, draft: GradeDraft, now: DateTime<Utc>) -> Self {
    Self {
      id,
      student_id: draft.student_id,
      subject_id: draft.subject_id,
      score: draft.score,
      max_score: draft.max_score,
      term: draft.term,
      remarks: draft.remarks,
      created_at: now,
      updated_at: now,
      is_synced: false,
    }
  }

  pub fn apply(&mut self, draft: GradeDraft, now: DateTime<Utc>) {
    self.student_id = draft.student_id;
    self.subject_id = draft.subject_id;
    self.score = draft.score;
    self.max_score = draft.max_score;
    self.term = draft.term;
    self.remarks = draft.remarks;
    self.updated_at = now;
    self.is_synced = false;
  }

  /// Score as a percentage of the maximum; 0 when the maximum is not positive.
  pub fn percentage(&self) -> f64 {
    if self.max_score > 0.0 {
      self.score / self.max_score * 100.0
    } else {
      0.0
    }
  }
}

impl Entity for Grade {
  fn entity_type() -> &'static str {
    "grades"
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeFilter {
  pub student_id: Option<String>,
  pub subject_id: Option<String>,
  pub term: Option<String>,
  pub page: u32,
  pub limit: u32,
}

impl Default for GradeFilter {
  fn default() -> Self {
    Self {
      student_id: None,
      subject_id: None,
      term: None,
      page: 1,
      limit: 50,
    }
  }
}

impl GradeFilter {
  pub fn matches(&self, grade: &Grade) -> bool {
    self
      .student_id
      .as_ref()
      .map_or(true, |id| &grade.student_id == id)
      && self
        .subject_id
        .as_ref()
        .map_or(true, |id| &grade.subject_id == id)
      && self
        .term
        .as_ref()
        .map_or(true, |term| grade.term.as_ref() == Some(term))
  }

  pub fn query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = vec![
      ("page".to_string(), self.page.to_string()),
      ("limit".to_string(), self.limit.to_string()),
    ];
    if let Some(id) = &self.student_id {
      pairs.push(("studentId".to_string(), id.clone()));
    }
    if let Some(id) = &self.subject_id {
      pairs.push(("subjectId".to_string(), id.clone()));
    }
    if let Some(term) = &self.term {
      pairs.push(("term".to_string(), term.clone()));
    }
    pairs
  }
}

/// Aggregate over a set of grades; averages are percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeStatistics {
  pub count: usize,
  pub average: Option<f64>,
  pub highest: Option<f64>,
  pub lowest: Option<f64>,
  pub average_by_subject: BTreeMap<String, f64>,
}

impl GradeStatistics {
  pub fn compute(grades: &[Grade]) -> Self {
    if grades.is_empty() {
      return Self::default();
    }

    let percentages: Vec<f64> = grades.iter().map(Grade::percentage).collect();
    let sum: f64 = percentages.iter().sum();

    let mut per_subject: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (grade, pct) in grades.iter().zip(&percentages) {
      let entry = per_subject.entry(grade.subject_id.clone()).or_default();
      entry.0 += pct;
      entry.1 += 1;
    }

    Self {
      count: grades.len(),
      average: Some(sum / grades.len() as f64),
      highest: percentages.iter().copied().reduce(f64::max),
      lowest: percentages.iter().copied().reduce(f64::min),
      average_by_subject: per_subject
        .into_iter()
        .map(|(subject, (total, n))| (subject, total / n as f64))
        .collect(),
    }
  }
}
