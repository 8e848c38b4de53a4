use async_trait::async_trait;
use color_eyre::Result;
use std::sync::Arc;

use super::mutation::Mutation;
use crate::remote::{self, RemoteClient};

/// Sends one queued mutation to the server.
///
/// This is the seam for conflict handling: the default replayer is
/// last-writer-wins, re-sending the stored payload as is. A replayer that
/// attaches and checks version stamps can be swapped in without touching
/// the queue.
#[async_trait]
pub trait MutationReplayer: Send + Sync {
  async fn replay(&self, mutation: &Mutation) -> Result<()>;
}

/// Replays through the regular remote client.
pub struct RemoteReplayer {
  client: Arc<dyn RemoteClient>,
}

impl RemoteReplayer {
  pub fn new(client: Arc<dyn RemoteClient>) -> Self {
    Self { client }
  }
}

#[async_trait]
impl MutationReplayer for RemoteReplayer {
  async fn replay(&self, mutation: &Mutation) -> Result<()> {
    let request = mutation.to_request()?;
    remote::call_unit(self.client.as_ref(), request).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote::{ApiResponse, Method};
  use crate::sync::Change;
  use crate::testing::FakeRemote;
  use serde_json::Value;

  #[tokio::test]
  async fn test_replays_as_request() {
    let remote = Arc::new(FakeRemote::new(|_| Ok(ApiResponse::ok(Value::Null))));
    let replayer = RemoteReplayer::new(remote.clone());

    replayer
      .replay(&Mutation::Grade(Change::Delete { id: "g1".to_string() }))
      .await
      .unwrap();

    let requests = remote.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Delete);
    assert_eq!(requests[0].path, "/grades/g1");
  }

  #[tokio::test]
  async fn test_rejection_is_error() {
    let remote = Arc::new(FakeRemote::new(|_| {
      Ok(ApiResponse::rejected(Some(422), "score out of range"))
    }));
    let replayer = RemoteReplayer::new(remote);

    let err = replayer
      .replay(&Mutation::Grade(Change::Delete { id: "g1".to_string() }))
      .await
      .unwrap_err();
    assert!(err.to_string().contains("score out of range"));
  }
}
