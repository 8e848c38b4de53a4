use serde::Serialize;

use super::{list_ttl, or_all, Services};
use crate::cache::QueryKey;
use crate::fetch::FetchResult;
use crate::models::{local_id, Grade, GradeDraft, GradeFilter, GradeStatistics, Page};
use crate::remote::RemoteRequest;
use crate::sync::{Change, Mutation, SyncResult};

const PREFIX: &str = "grades_";

/// Which grades a statistics query aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeStatisticsScope {
  All,
  Student(String),
  Subject(String),
}

impl GradeStatisticsScope {
  fn matches(&self, grade: &Grade) -> bool {
    match self {
      Self::All => true,
      Self::Student(id) => &grade.student_id == id,
      Self::Subject(id) => &grade.subject_id == id,
    }
  }

  fn query_pairs(&self) -> Vec<(String, String)> {
    match self {
      Self::All => Vec::new(),
      Self::Student(id) => vec![("studentId".to_string(), id.clone())],
      Self::Subject(id) => vec![("subjectId".to_string(), id.clone())],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GradeKey {
  List(GradeFilter),
  Detail(String),
  Statistics(GradeStatisticsScope),
}

impl QueryKey for GradeKey {
  fn cache_key(&self) -> String {
    match self {
      Self::List(filter) => format!(
        "grades_list_{}_{}_{}_{}_{}",
        or_all(filter.student_id.as_deref()),
        or_all(filter.subject_id.as_deref()),
        or_all(filter.term.as_deref()),
        filter.page,
        filter.limit
      ),
      Self::Detail(id) => format!("grades_detail_{}", id),
      Self::Statistics(GradeStatisticsScope::All) => "grades_statistics_all".to_string(),
      Self::Statistics(GradeStatisticsScope::Student(id)) => {
        format!("grades_statistics_student_{}", id)
      }
      Self::Statistics(GradeStatisticsScope::Subject(id)) => {
        format!("grades_statistics_subject_{}", id)
      }
    }
  }

  fn description(&self) -> String {
    match self {
      Self::List(filter) => format!("grades page {}", filter.page),
      Self::Detail(id) => format!("grade {}", id),
      Self::Statistics(scope) => format!("grade statistics ({:?})", scope),
    }
  }
}

#[derive(Serialize)]
struct BatchCreate<'a> {
  grades: &'a [Grade],
}

pub struct GradeRepository {
  services: Services,
}

impl GradeRepository {
  pub fn new(services: Services) -> Self {
    Self { services }
  }

  pub async fn list(&self, filter: &GradeFilter) -> FetchResult<Page<Grade>> {
    let local_filter = filter.clone();
    let sync = self.services.sync.clone();

    self
      .services
      .read(
        &GradeKey::List(filter.clone()),
        list_ttl(),
        false,
        RemoteRequest::get("/grades").with_query(filter.query_pairs()),
        move |store| {
          let all: Vec<Grade> = store.load_entities()?;
          if all.is_empty() {
            return Ok(None);
          }
          let matching: Vec<Grade> = all
            .into_iter()
            .filter(|g| local_filter.matches(g))
            .collect();
          Ok(Some(Page::paginate(
            &matching,
            local_filter.page,
            local_filter.limit,
          )))
        },
        move |page: &Page<Grade>| sync.absorb_remote(&page.items).map(|_| ()),
      )
      .await
  }

  pub async fn get(&self, id: &str) -> FetchResult<Grade> {
    let wanted = id.to_string();

    self
      .services
      .read(
        &GradeKey::Detail(id.to_string()),
        list_ttl(),
        false,
        RemoteRequest::get(format!("/grades/{}", id)),
        move |store| store.load_entity(&wanted),
        |_| Ok(()),
      )
      .await
  }

  /// Averages for one student, one subject or everything. Offline, computed
  /// from the grades stored locally.
  pub async fn statistics(&self, scope: GradeStatisticsScope) -> FetchResult<GradeStatistics> {
    let request = RemoteRequest::get("/grades/statistics").with_query(scope.query_pairs());
    let local_scope = scope.clone();

    self
      .services
      .read(
        &GradeKey::Statistics(scope),
        list_ttl(),
        false,
        request,
        move |store| {
          let grades: Vec<Grade> = store
            .load_entities::<Grade>()?
            .into_iter()
            .filter(|g| local_scope.matches(g))
            .collect();
          Ok((!grades.is_empty()).then(|| GradeStatistics::compute(&grades)))
        },
        |_| Ok(()),
      )
      .await
  }

  pub async fn create(&self, draft: GradeDraft) -> SyncResult<Grade> {
    let now = self.services.store.now();
    let id = local_id("grades", id_seed(&draft).as_bytes(), now);
    let pending = Grade::from_draft(id.clone(), draft.clone(), now);

    self
      .services
      .save(Mutation::Grade(Change::Create { id, draft }), pending, PREFIX)
      .await
  }

  pub async fn update(&self, id: &str, draft: GradeDraft) -> SyncResult<Grade> {
    let now = self.services.store.now();
    let pending = match self.services.store.load_entity::<Grade>(id) {
      Ok(Some(mut existing)) => {
        existing.apply(draft.clone(), now);
        existing
      }
      Ok(None) => Grade::from_draft(id.to_string(), draft.clone(), now),
      Err(e) => {
        return SyncResult::Failed {
          message: e.to_string(),
        }
      }
    };

    self
      .services
      .save(
        Mutation::Grade(Change::Update {
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
      .remove::<Grade>(Mutation::Grade(Change::Delete { id: id.to_string() }), PREFIX)
      .await
  }

  /// Record a whole class's marks at once.
  pub async fn batch_create(&self, drafts: Vec<GradeDraft>) -> SyncResult<Vec<Grade>> {
    let now = self.services.store.now();
    let (pending, mutations): (Vec<Grade>, Vec<Mutation>) = drafts
      .into_iter()
      .map(|draft| {
        let id = local_id("grades", id_seed(&draft).as_bytes(), now);
        (
          Grade::from_draft(id.clone(), draft.clone(), now),
          Mutation::Grade(Change::Create { id, draft }),
        )
      })
      .unzip();

    let request =
      match RemoteRequest::post("/grades/batch").with_json(&BatchCreate { grades: &pending }) {
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
}

fn id_seed(draft: &GradeDraft) -> String {
  format!(
    "{}|{}|{}",
    draft.student_id,
    draft.subject_id,
    draft.term.as_deref().unwrap_or("")
  )
}
