use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
  Male,
  Female,
}

impl Gender {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Male => "male",
      Self::Female => "female",
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
  #[default]
  Active,
  Inactive,
  Graduated,
  Transferred,
}

impl StudentStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Active => "active",
      Self::Inactive => "inactive",
      Self::Graduated => "graduated",
      Self::Transferred => "transferred",
    }
  }
}

/// A student record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
  pub id: String,
  pub first_name: String,
  pub last_name: String,
  pub gender: Option<Gender>,
  pub class_id: Option<String>,
  #[serde(default)]
  pub status: StudentStatus,
  pub academic_year: Option<String>,
  pub email: Option<String>,
  pub date_of_birth: Option<NaiveDate>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub is_synced: bool,
}

/// Fields a client may set on create/update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentDraft {
  pub first_name: String,
  pub last_name: String,
  pub gender: Option<Gender>,
  pub class_id: Option<String>,
  #[serde(default)]
  pub status: StudentStatus,
  pub academic_year: Option<String>,
  pub email: Option<String>,
  pub date_of_birth: Option<NaiveDate>,
}

impl Student {
  pub fn from_draft(id: String, draft: StudentDraft, now: DateTime<Utc>) -> Self {
    Self {
      id,
      first_name: draft.first_name,
      last_name: draft.last_name,
      gender: draft.gender,
      class_id: draft.class_id,
      status: draft.status,
      academic_year: draft.academic_year,
      email: draft.email,
      date_of_birth: draft.date_of_birth,
      created_at: now,
      updated_at: now,
      is_synced: false,
    }
  }

  /// Apply a draft on top of an existing record, keeping identity and creation time.
  pub fn apply(&mut self, draft: StudentDraft, now: DateTime<Utc>) {
    self.first_name = draft.first_name;
    self.last_name = draft.last_name;
    self.gender = draft.gender;
    self.class_id = draft.class_id;
    self.status = draft.status;
    self.academic_year = draft.academic_year;
    self.email = draft.email;
    self.date_of_birth = draft.date_of_birth;
    self.updated_at = now;
    self.is_synced = false;
  }

  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name)
  }
}

impl Entity for Student {
  fn entity_type() -> &'static str {
    "students"
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

/// List query parameters. Every field takes part in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentFilter {
  pub class_id: Option<String>,
  pub gender: Option<Gender>,
  pub status: Option<StudentStatus>,
  /// Free-text search over names and email; empty means no search
  #[serde(default)]
  pub search: String,
  pub academic_year: Option<String>,
  pub page: u32,
  pub limit: u32,
}

impl Default for StudentFilter {
  fn default() -> Self {
    Self {
      class_id: None,
      gender: None,
      status: None,
      search: String::new(),
      academic_year: None,
      page: 1,
      limit: 20,
    }
  }
}

impl StudentFilter {
  pub fn matches(&self, student: &Student) -> bool {
    if let Some(class_id) = &self.class_id {
      if student.class_id.as_ref() != Some(class_id) {
        return false;
      }
    }
    if self.gender.is_some() && student.gender != self.gender {
      return false;
    }
    if let Some(status) = self.status {
      if student.status != status {
        return false;
      }
    }
    if let Some(year) = &self.academic_year {
      if student.academic_year.as_ref() != Some(year) {
        return false;
      }
    }

    let needle = self.search.trim().to_lowercase();
    if needle.is_empty() {
      return true;
    }
    student.full_name().to_lowercase().contains(&needle)
      || student
        .email
        .as_deref()
        .is_some_and(|email| email.to_lowercase().contains(&needle))
  }

  /// Query-string pairs for the list endpoint.
  pub fn query_pairs(&self) -> Vec<(String, String)> {
    let mut pairs = vec![
      ("page".to_string(), self.page.to_string()),
      ("limit".to_string(), self.limit.to_string()),
    ];
    if let Some(class_id) = &self.class_id {
      pairs.push(("classId".to_string(), class_id.clone()));
    }
    if let Some(gender) = self.gender {
      pairs.push(("gender".to_string(), gender.as_str().to_string()));
    }
    if let Some(status) = self.status {
      pairs.push(("status".to_string(), status.as_str().to_string()));
    }
    if !self.search.is_empty() {
      pairs.push(("search".to_string(), self.search.clone()));
    }
    if let Some(year) = &self.academic_year {
      pairs.push(("academicYear".to_string(), year.clone()));
    }
    pairs
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatistics {
  pub total: usize,
  pub by_status: BTreeMap<String, usize>,
  pub by_gender: BTreeMap<String, usize>,
  pub by_class: BTreeMap<String, usize>,
}

impl StudentStatistics {
  pub fn compute(students: &[Student]) -> Self {
    let mut stats = Self {
      total: students.len(),
      ..Self::default()
    };
    for student in students {
      *stats
        .by_status
        .entry(student.status.as_str().to_string())
        .or_default() += 1;
      let gender = student.gender.map(|g| g.as_str()).unwrap_or("unknown");
      *stats.by_gender.entry(gender.to_string()).or_default() += 1;
      let class = student.class_id.as_deref().unwrap_or("unassigned");
      *stats.by_class.entry(class.to_string()).or_default() += 1;
    }
    stats
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn student(first: &str, gender: Gender, class: &str) -> Student {
    Student::from_draft(
      format!("id-{}", first),
      StudentDraft {
        first_name: first.to_string(),
        last_name: "Doe".to_string(),
        gender: Some(gender),
        class_id: Some(class.to_string()),
        status: StudentStatus::Active,
        academic_year: Some("2025-2026".to_string()),
        email: Some(format!("{}@school.test", first.to_lowercase())),
        date_of_birth: None,
      },
      Utc::now(),
    )
  }

  #[test]
  fn test_filter_matches_search_and_fields() {
    let amina = student("Amina", Gender::Female, "c1");
    let filter = StudentFilter {
      search: "AMI".to_string(),
      ..StudentFilter::default()
    };
    assert!(filter.matches(&amina));

    let filter = StudentFilter {
      gender: Some(Gender::Male),
      ..StudentFilter::default()
    };
    assert!(!filter.matches(&amina));

    let filter = StudentFilter {
      class_id: Some("c2".to_string()),
      ..StudentFilter::default()
    };
    assert!(!filter.matches(&amina));
  }

  #[test]
  fn test_statistics_counts() {
    let students = vec![
      student("A", Gender::Female, "c1"),
      student("B", Gender::Male, "c1"),
      student("C", Gender::Female, "c2"),
    ];
    let stats = StudentStatistics::compute(&students);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_gender["female"], 2);
    assert_eq!(stats.by_class["c1"], 2);
    assert_eq!(stats.by_status["active"], 3);
  }

  #[test]
  fn test_serializes_camel_case() {
    let json = serde_json::to_value(student("A", Gender::Male, "c1")).unwrap();
    assert!(json.get("firstName").is_some());
    assert!(json.get("isSynced").is_some());
  }
}
