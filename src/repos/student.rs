use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

use super::{list_ttl, or_all, Services};
use crate::cache::QueryKey;
use crate::fetch::FetchResult;
use crate::models::{local_id, Page, Student, StudentDraft, StudentFilter, StudentStatistics};
use crate::remote::RemoteRequest;
use crate::sync::{Change, Mutation, SyncResult};

const PREFIX: &str = "students_";

/// Cacheable student reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentKey {
  List(StudentFilter),
  Detail(String),
  Statistics,
}

impl QueryKey for StudentKey {
  fn cache_key(&self) -> String {
    match self {
      Self::List(filter) => format!(
        "students_list_{}_{}_{}_{}_{}_{}_{}",
        or_all(filter.class_id.as_deref()),
        or_all(filter.gender.map(|g| g.as_str())),
        or_all(filter.status.map(|s| s.as_str())),
        filter.search,
        or_all(filter.academic_year.as_deref()),
        filter.page,
        filter.limit
      ),
      Self::Detail(id) => format!("students_detail_{}", id),
      Self::Statistics => "students_statistics".to_string(),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::List(filter) => format!("students page {} (limit {})", filter.page, filter.limit),
      Self::Detail(id) => format!("student {}", id),
      Self::Statistics => "student statistics".to_string(),
    }
  }
}

#[derive(Serialize)]
struct BatchCreate<'a> {
  students: &'a [Student],
}

pub struct StudentRepository {
  services: Services,
}

impl StudentRepository {
  pub fn new(services: Services) -> Self {
    Self { services }
  }

  pub async fn list(&self, filter: &StudentFilter) -> FetchResult<Page<Student>> {
    self.list_with(filter, false).await
  }

  /// Same as [`list`](Self::list) but skips the cache.
  pub async fn refresh_list(&self, filter: &StudentFilter) -> FetchResult<Page<Student>> {
    self.list_with(filter, true).await
  }

  async fn list_with(&self, filter: &StudentFilter, force: bool) -> FetchResult<Page<Student>> {
    let local_filter = filter.clone();
    let sync = self.services.sync.clone();

    self
      .services
      .read(
        &StudentKey::List(filter.clone()),
        list_ttl(),
        force,
        RemoteRequest::get("/students").with_query(filter.query_pairs()),
        move |store| {
          let all: Vec<Student> = store.load_entities()?;
          if all.is_empty() {
            return Ok(None);
          }
          let matching: Vec<Student> = all
            .into_iter()
            .filter(|s| local_filter.matches(s))
            .collect();
          Ok(Some(Page::paginate(
            &matching,
            local_filter.page,
            local_filter.limit,
          )))
        },
        move |page: &Page<Student>| sync.absorb_remote(&page.items).map(|_| ()),
      )
      .await
  }

  pub async fn get(&self, id: &str) -> FetchResult<Student> {
    let wanted = id.to_string();
    let sync = self.services.sync.clone();

    self
      .services
      .read(
        &StudentKey::Detail(id.to_string()),
        list_ttl(),
        false,
        RemoteRequest::get(format!("/students/{}", id)),
        move |store| store.load_entity(&wanted),
        move |student: &Student| sync.absorb_remote(std::slice::from_ref(student)).map(|_| ()),
      )
      .await
  }

  pub async fn statistics(&self) -> FetchResult<StudentStatistics> {
    self
      .services
      .read(
        &StudentKey::Statistics,
        list_ttl(),
        false,
        RemoteRequest::get("/students/statistics"),
        |store| {
          let all: Vec<Student> = store.load_entities()?;
          Ok((!all.is_empty()).then(|| StudentStatistics::compute(&all)))
        },
        |_| Ok(()),
      )
      .await
  }

  pub async fn create(&self, draft: StudentDraft) -> SyncResult<Student> {
    let now = self.services.store.now();
    let id = local_id("students", id_seed(&draft).as_bytes(), now);
    let pending = Student::from_draft(id.clone(), draft.clone(), now);

    self
      .services
      .save(Mutation::Student(Change::Create { id, draft }), pending, PREFIX)
      .await
  }

  pub async fn update(&self, id: &str, draft: StudentDraft) -> SyncResult<Student> {
    let now = self.services.store.now();
    let pending = match self.services.store.load_entity::<Student>(id) {
      Ok(Some(mut existing)) => {
        existing.apply(draft.clone(), now);
        existing
      }
      Ok(None) => Student::from_draft(id.to_string(), draft.clone(), now),
      Err(e) => {
        return SyncResult::Failed {
          message: e.to_string(),
        }
      }
    };

    self
      .services
      .save(
        Mutation::Student(Change::Update {
          id: id.to_string(),
          draft,
        }),
        pending,
        PREFIX,
      )
      .await
  }

  pub async fn delete(&self, id: &str) -> SyncResult<()> {
    self
      .services
      .remove::<Student>(
        Mutation::Student(Change::Delete { id: id.to_string() }),
        PREFIX,
      )
      .await
  }

  /// Create several students with one server call; queued one by one when that is not possible.
  pub async fn batch_create(&self, drafts: Vec<StudentDraft>) -> SyncResult<Vec<Student>> {
    let now = self.services.store.now();
    let mut mutations = Vec::with_capacity(drafts.len());
    let mut pending = Vec::with_capacity(drafts.len());

    for draft in drafts {
      let id = local_id("students", id_seed(&draft).as_bytes(), now);
      pending.push(Student::from_draft(id.clone(), draft.clone(), now));
      mutations.push(Mutation::Student(Change::Create { id, draft }));
    }

    let request = match RemoteRequest::post("/students/batch").with_json(&BatchCreate {
      students: &pending,
    }) {
      Ok(request) => request,
      Err(e) => {
        return SyncResult::Failed {
          message: e.to_string(),
        }
      }
    };

    self
      .services
      .save_batch(mutations, pending, request, PREFIX)
      .await
  }

  /// Every locally known student as pretty-printed JSON.
  pub fn export_json(&self) -> Result<String> {
    let students: Vec<Student> = self.services.store.load_entities()?;
    serde_json::to_string_pretty(&students).map_err(|e| eyre!("Failed to export students: {}", e))
  }

  /// Import a JSON array of student drafts as one batch.
  pub async fn import_json(&self, json: &str) -> Result<SyncResult<Vec<Student>>> {
    let drafts: Vec<StudentDraft> =
      serde_json::from_str(json).map_err(|e| eyre!("Invalid student import: {}", e))?;
    if drafts.is_empty() {
      return Err(eyre!("Student import contains no records"));
    }
    tracing::info!(count = drafts.len(), "importing students");
    Ok(self.batch_create(drafts).await)
  }
}

fn id_seed(draft: &StudentDraft) -> String {
  format!(
    "{}|{}|{}",
    draft.first_name,
    draft.last_name,
    draft.email.as_deref().unwrap_or("")
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::DataSource;
  use crate::models::{Gender, StudentStatus};
  use crate::remote::{ApiResponse, Method};
  use crate::repos::tests::services;
  use chrono::Duration;
  use serde_json::json;

  fn draft(first: &str) -> StudentDraft {
    StudentDraft {
      first_name: first.to_string(),
      last_name: "Ndiaye".to_string(),
      gender: Some(Gender::Female),
      class_id: Some("c1".to_string()),
      status: StudentStatus::Active,
      academic_year: Some("2025-2026".to_string()),
      email: None,
      date_of_birth: None,
    }
  }

  fn page_json() -> serde_json::Value {
    json!({
      "items": [{
        "id": "s1",
        "firstName": "Awa",
        "lastName": "Ndiaye",
        "gender": "female",
        "classId": "c1",
        "status": "active",
        "academicYear": "2025-2026",
        "email": null,
        "dateOfBirth": null,
        "createdAt": "2026-01-05T08:00:00Z",
        "updatedAt": "2026-01-05T08:00:00Z"
      }],
      "total": 1,
      "page": 1,
      "limit": 20
    })
  }

  #[test]
  fn test_list_key_uses_all_for_absent_filters() {
    let key = StudentKey::List(StudentFilter::default());
    assert_eq!(key.cache_key(), "students_list_all_all_all__all_1_20");

    let key = StudentKey::List(StudentFilter {
      class_id: Some("c1".to_string()),
      gender: Some(Gender::Male),
      search: "ab".to_string(),
      page: 2,
      ..StudentFilter::default()
    });
    assert_eq!(key.cache_key(), "students_list_c1_male_all_ab_all_2_20");
  }

  #[tokio::test]
  async fn test_list_offline_then_online_then_cached() {
    let (harness, remote, services) = services(false).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(page_json())));
    let repo = StudentRepository::new(services);
    let filter = StudentFilter::default();

    let offline = repo.list(&filter).await;
    assert!(!offline.is_success());
    assert!(!offline.message().unwrap().is_empty());
    assert_eq!(remote.request_count(), 0);

    harness.set_online(true).await;
    let online = repo.list(&filter).await;
    assert_eq!(online.source(), Some(DataSource::Remote));
    assert_eq!(remote.request_count(), 1);

    harness.clock.advance(Duration::minutes(29));
    let cached = repo.list(&filter).await;
    assert_eq!(cached.source(), Some(DataSource::Cache));
    assert_eq!(cached.data().unwrap().items[0].first_name, "Awa");
    assert_eq!(remote.request_count(), 1);
  }

  #[tokio::test]
  async fn test_refresh_list_bypasses_fresh_cache() {
    let (_harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(page_json())));
    let repo = StudentRepository::new(services);
    let filter = StudentFilter::default();

    repo.list(&filter).await;
    let refreshed = repo.refresh_list(&filter).await;

    assert_eq!(refreshed.source(), Some(DataSource::Remote));
    assert_eq!(remote.request_count(), 2);
  }

  #[tokio::test]
  async fn test_remote_list_is_kept_for_offline_use() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(page_json())));
    let repo = StudentRepository::new(services);

    repo.list(&StudentFilter::default()).await;
    harness.set_online(false).await;

    let offline = repo.get("s1").await;
    assert_eq!(offline.source(), Some(DataSource::Local));
    assert_eq!(offline.data().unwrap().last_name, "Ndiaye");
  }

  #[tokio::test]
  async fn test_offline_create_is_visible_locally_and_queued() {
    let (harness, remote, services) = services(false).await;
    let repo = StudentRepository::new(services);

    let result = repo.create(draft("Fatou")).await;
    assert!(matches!(result, SyncResult::Queued { .. }));
    assert_eq!(remote.request_count(), 0);

    let page = repo.list(&StudentFilter::default()).await;
    assert_eq!(page.source(), Some(DataSource::Local));
    let student = &page.data().unwrap().items[0];
    assert_eq!(student.first_name, "Fatou");
    assert!(!student.is_synced);
    assert_eq!(harness.store.queue_len(None).unwrap(), 1);
  }

  #[tokio::test]
  async fn test_online_create_posts_and_invalidates() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|req| {
      let mut student = req.body.clone().unwrap_or_default();
      student["createdAt"] = json!("2026-01-05T08:00:00Z");
      student["updatedAt"] = json!("2026-01-05T08:00:00Z");
      Ok(ApiResponse::ok(student))
    });
    harness.cache.put("students_list_all_all_all__all_1_20", &1u8).unwrap();
    let repo = StudentRepository::new(services);

    let result = repo.create(draft("Moussa")).await;

    let SyncResult::Synced(student) = result else {
      panic!("expected synced create");
    };
    assert!(crate::models::is_local_id(&student.id));
    assert_eq!(remote.requests()[0].method, Method::Post);
    assert!(harness.cache.is_empty().unwrap());
    let stored: Student = harness.store.load_entity(&student.id).unwrap().unwrap();
    assert!(stored.is_synced);
  }

  #[tokio::test]
  async fn test_delete_offline_removes_local_copy() {
    let (harness, _remote, services) = services(false).await;
    let repo = StudentRepository::new(services);
    let SyncResult::Queued { .. } = repo.create(draft("Ibou")).await else {
      panic!("expected queued create");
    };
    let id = harness.store.load_entities::<Student>().unwrap()[0].id.clone();

    let result = repo.delete(&id).await;
    assert!(matches!(result, SyncResult::Queued { .. }));
    assert!(harness.store.load_entity::<Student>(&id).unwrap().is_none());
    assert_eq!(harness.store.queue_len(None).unwrap(), 2);
  }

  #[tokio::test]
  async fn test_import_and_export() {
    let (_harness, _remote, services) = services(false).await;
    let repo = StudentRepository::new(services);
    let drafts = serde_json::to_string(&vec![draft("A"), draft("B")]).unwrap();

    let result = repo.import_json(&drafts).await.unwrap();
    assert!(matches!(result, SyncResult::Queued { .. }));

    let exported: Vec<Student> = serde_json::from_str(&repo.export_json().unwrap()).unwrap();
    assert_eq!(exported.len(), 2);
    assert!(repo.import_json("[]").await.is_err());
    assert!(repo.import_json("{").await.is_err());
  }

  #[tokio::test]
  async fn test_offline_statistics_from_local_records() {
    let (_harness, _remote, services) = services(false).await;
    let repo = StudentRepository::new(services);
    assert!(!repo.statistics().await.is_success());

    repo.create(draft("A")).await;
    let stats = repo.statistics().await;
    assert_eq!(stats.source(), Some(DataSource::Local));
    assert_eq!(stats.data().unwrap().total, 1);
  }
}
