use super::{list_ttl, Services};
use crate::cache::QueryKey;
use crate::fetch::FetchResult;
use crate::models::{local_id, Subject, SubjectDraft};
use crate::remote::RemoteRequest;
use crate::sync::{Change, Mutation, SyncResult};

const PREFIX: &str = "subjects_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectKey {
  List,
  Detail(String),
}

impl QueryKey for SubjectKey {
  fn cache_key(&self) -> String {
    match self {
      Self::List => "subjects_list".to_string(),
      Self::Detail(id) => format!("subjects_detail_{}", id),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::List => "all subjects".to_string(),
      Self::Detail(id) => format!("subject {}", id),
    }
  }
}

pub struct SubjectRepository {
  services: Services,
}

impl SubjectRepository {
  pub fn new(services: Services) -> Self {
    Self { services }
  }

  pub async fn list(&self) -> FetchResult<Vec<Subject>> {
    let sync = self.services.sync.clone();

    self
      .services
      .read(
        &SubjectKey::List,
        list_ttl(),
        false,
        RemoteRequest::get("/subjects"),
        |store| {
          let subjects: Vec<Subject> = store.load_entities()?;
          Ok((!subjects.is_empty()).then_some(subjects))
        },
        move |subjects: &Vec<Subject>| sync.absorb_remote(subjects).map(|_| ()),
      )
      .await
  }

  pub async fn get(&self, id: &str) -> FetchResult<Subject> {
    let wanted = id.to_string();

    self
      .services
      .read(
        &SubjectKey::Detail(id.to_string()),
        list_ttl(),
        false,
        RemoteRequest::get(format!("/subjects/{}", id)),
        move |store| store.load_entity(&wanted),
        |_| Ok(()),
      )
      .await
  }

  pub async fn create(&self, draft: SubjectDraft) -> SyncResult<Subject> {
    let now = self.services.store.now();
    let id = local_id("subjects", draft.code.as_bytes(), now);
    let pending = Subject::from_draft(id.clone(), draft.clone(), now);

    self
      .services
      .save(Mutation::Subject(Change::Create { id, draft }), pending, PREFIX)
      .await
  }

  pub async fn update(&self, id: &str, draft: SubjectDraft) -> SyncResult<Subject> {
    let now = self.services.store.now();
    let pending = match self.services.store.load_entity::<Subject>(id) {
      Ok(Some(mut existing)) => {
        existing.apply(draft.clone(), now);
        existing
      }
      Ok(None) => Subject::from_draft(id.to_string(), draft.clone(), now),
      Err(e) => {
        return SyncResult::Failed {
          message: e.to_string(),
        }
      }
    };

    self
      .services
      .save(
        Mutation::Subject(Change::Update {
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
      .remove::<Subject>(
        Mutation::Subject(Change::Delete { id: id.to_string() }),
        PREFIX,
      )
      .await
  }
}
