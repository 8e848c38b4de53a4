use color_eyre::Result;

use super::{session_ttl, token_ttl, Services};
use crate::cache::{Invalidation, QueryKey};
use crate::fetch::{FetchRequest, FetchResult};
use crate::models::{Credentials, Session, User};
use crate::remote::{self, RemoteRequest};

const PREFIX: &str = "auth_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKey {
  /// Token plus user, as returned by login
  Session,
  /// Profile from `/auth/me`
  CurrentUser,
}

impl QueryKey for AuthKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Session => "auth_session".to_string(),
      Self::CurrentUser => "auth_current_user".to_string(),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Session => "session".to_string(),
      Self::CurrentUser => "current user".to_string(),
    }
  }
}

/// Owns the bearer token: sets it on login and drops every trace of it on
/// logout or as soon as the server rejects it.
#[derive(Clone)]
pub struct AuthRepository {
  services: Services,
}

impl AuthRepository {
  pub fn new(services: Services) -> Self {
    Self { services }
  }

  pub async fn login(&self, credentials: &Credentials) -> Result<Session> {
    let request = RemoteRequest::post("/auth/login").with_json(credentials)?;

    let session: Session = match remote::call(self.services.client.as_ref(), request).await {
      Ok(session) => session,
      Err(e) => {
        let refused = e
          .downcast_ref::<remote::RemoteRejection>()
          .is_some_and(remote::RemoteRejection::is_client_error);
        if refused {
          tracing::info!(username = %credentials.username, "login rejected");
          self.clear();
        }
        return Err(e);
      }
    };

    self.services.client.set_token(Some(session.token.clone()));
    let cache = self.services.fetcher.cache();
    cache.put(&AuthKey::Session.cache_key(), &session)?;
    cache.put(&AuthKey::CurrentUser.cache_key(), &session.user)?;
    tracing::info!(username = %session.user.username, "logged in");
    Ok(session)
  }

  /// Always clears local state; telling the server is best effort.
  pub async fn logout(&self) {
    if self.services.client.has_token() {
      if let Err(e) =
        remote::call_unit(self.services.client.as_ref(), RemoteRequest::post("/auth/logout")).await
      {
        tracing::debug!(error = %e, "server logout failed");
      }
    }
    self.clear();
    tracing::info!("logged out");
  }

  /// The signed-in user. A 401/403 from the server ends the session.
  pub async fn current_user(&self) -> FetchResult<User> {
    let client = self.services.client.clone();
    let cache = self.services.fetcher.cache().clone();
    let on_reject = self.clone();

    self
      .services
      .fetcher
      .fetch_data(
        FetchRequest::new(&AuthKey::CurrentUser, session_ttl()),
        move || async move {
          let result = remote::call::<User>(client.as_ref(), RemoteRequest::get("/auth/me")).await;
          if let Err(e) = &result {
            if remote::is_auth_failure(e) {
              tracing::warn!("session rejected by server");
              on_reject.clear();
            }
          }
          result
        },
        move || async move {
          Ok(
            cache
              .get::<Session>(&AuthKey::Session.cache_key(), token_ttl())?
              .map(|session| session.user),
          )
        },
      )
      .await
  }

  /// Pick up a session saved by an earlier login, if still valid.
  pub fn restore_session(&self) -> Result<Option<Session>> {
    let cache = self.services.fetcher.cache();
    let session = cache.get::<Session>(&AuthKey::Session.cache_key(), token_ttl())?;

    match session {
      Some(session) if !session.is_expired(self.services.store.now()) => {
        self.services.client.set_token(Some(session.token.clone()));
        tracing::debug!(username = %session.user.username, "session restored");
        Ok(Some(session))
      }
      Some(_) => {
        tracing::info!("stored session expired");
        self.clear();
        Ok(None)
      }
      None => Ok(None),
    }
  }

  pub fn is_authenticated(&self) -> bool {
    self.services.client.has_token()
  }

  fn clear(&self) {
    self.services.client.set_token(None);
    if let Err(e) = self
      .services
      .fetcher
      .cache()
      .invalidate(Invalidation::Prefix(PREFIX.to_string()))
    {
      tracing::error!(error = %e, "failed to clear cached auth state");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::DataSource;
  use crate::remote::{ApiResponse, RemoteClient};
  use crate::repos::tests::services;
  use chrono::Duration;
  use color_eyre::eyre::eyre;
  use serde_json::json;

  fn credentials() -> Credentials {
    Credentials {
      username: "mme.sow".to_string(),
      password: "correct horse".to_string(),
    }
  }

  fn session_json() -> serde_json::Value {
    json!({
      "token": "tok-123",
      "user": {
        "id": "u1",
        "username": "mme.sow",
        "fullName": "Aissatou Sow",
        "role": "teacher",
        "email": null
      },
      "expiresAt": null
    })
  }

  #[tokio::test]
  async fn test_login_sets_token_and_caches_session() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(session_json())));
    let repo = AuthRepository::new(services);

    let session = repo.login(&credentials()).await.unwrap();

    assert_eq!(session.user.full_name, "Aissatou Sow");
    assert_eq!(remote.token().as_deref(), Some("tok-123"));
    assert!(repo.is_authenticated());
    assert_eq!(harness.cache.len().unwrap(), 2);
  }

  #[tokio::test]
  async fn test_rejected_login_clears_auth_state() {
    let (harness, remote, services) = services(true).await;
    harness.cache.put("auth_session", &"stale").unwrap();
    remote.set_token(Some("old".to_string()));
    remote.set_handler(|_| Ok(ApiResponse::rejected(Some(401), "bad credentials")));
    let repo = AuthRepository::new(services);

    assert!(repo.login(&credentials()).await.is_err());
    assert!(!repo.is_authenticated());
    assert!(harness.cache.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_network_failure_keeps_auth_state() {
    let (harness, remote, services) = services(true).await;
    harness.cache.put("auth_session", &"kept").unwrap();
    remote.set_token(Some("tok".to_string()));
    let repo = AuthRepository::new(services);

    assert!(repo.login(&credentials()).await.is_err());
    assert!(repo.is_authenticated());
    assert_eq!(harness.cache.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_server_error_during_login_keeps_auth_state() {
    let (harness, remote, services) = services(true).await;
    harness.cache.put("auth_session", &"kept").unwrap();
    remote.set_token(Some("tok".to_string()));
    remote.set_handler(|_| Ok(ApiResponse::rejected(Some(503), "maintenance")));
    let repo = AuthRepository::new(services);

    assert!(repo.login(&credentials()).await.is_err());
    assert!(repo.is_authenticated());
    assert_eq!(harness.cache.len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_current_user_401_with_unreadable_body_clears_session() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(session_json())));
    let repo = AuthRepository::new(services);
    repo.login(&credentials()).await.unwrap();
    harness.clock.advance(Duration::hours(2));

    remote.set_handler(|_| {
      Ok(ApiResponse {
        data: Some(json!({"error": "expired"})),
        ..ApiResponse::rejected(Some(401), "token expired")
      })
    });
    let user = repo.current_user().await;

    assert!(!user.is_success());
    assert!(!repo.is_authenticated());
  }

  #[tokio::test]
  async fn test_current_user_401_clears_session() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(session_json())));
    let repo = AuthRepository::new(services);
    repo.login(&credentials()).await.unwrap();
    harness.clock.advance(Duration::hours(2));

    remote.set_handler(|_| Ok(ApiResponse::rejected(Some(401), "token expired")));
    let user = repo.current_user().await;

    assert!(!user.is_success());
    assert!(!repo.is_authenticated());
    assert!(harness.cache.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_current_user_offline_uses_saved_session() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(session_json())));
    let repo = AuthRepository::new(services);
    repo.login(&credentials()).await.unwrap();

    harness.set_online(false).await;
    let user = repo.current_user().await;
    assert_eq!(user.source(), Some(DataSource::Local));
    assert_eq!(user.data().unwrap().username, "mme.sow");
  }

  #[tokio::test]
  async fn test_restore_session_after_restart() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(session_json())));
    AuthRepository::new(services.clone())
      .login(&credentials())
      .await
      .unwrap();
    remote.set_token(None);

    let repo = AuthRepository::new(services);
    assert!(repo.restore_session().unwrap().is_some());
    assert_eq!(remote.token().as_deref(), Some("tok-123"));

    harness.clock.advance(Duration::hours(25));
    remote.set_token(None);
    assert!(repo.restore_session().unwrap().is_none());
  }

  #[tokio::test]
  async fn test_logout_always_clears() {
    let (harness, remote, services) = services(true).await;
    remote.set_handler(|_| Ok(ApiResponse::ok(session_json())));
    let repo = AuthRepository::new(services);
    repo.login(&credentials()).await.unwrap();
    remote.set_handler(|_| Err(eyre!("connection reset")));

    repo.logout().await;

    assert!(!repo.is_authenticated());
    assert!(harness.cache.is_empty().unwrap());
    assert_eq!(remote.requests().last().unwrap().path, "/auth/logout");
  }
}
