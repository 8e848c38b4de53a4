use chrono::{DateTime, Duration, Utc};

use crate::db::{QueueRow, QueueStatus};

/// How failed replays are retried.
///
/// The default retries every failed row on every drain, forever, with no
/// delay. Setting `max_attempts` moves a row to `abandoned` once it has
/// failed that many times; setting `backoff_base` delays the next attempt by
/// `base * 2^(failures - 1)`, capped at `base * 2^8`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: Option<u32>,
  pub backoff_base: Option<std::time::Duration>,
}

const MAX_BACKOFF_EXPONENT: u32 = 8;

/// Longest delay ever scheduled, whatever the configured base.
fn max_backoff() -> Duration {
  Duration::days(365 * 100)
}

impl RetryPolicy {
  pub fn unbounded() -> Self {
    Self::default()
  }

  pub fn bounded(max_attempts: u32, backoff_base: Option<std::time::Duration>) -> Self {
    Self {
      max_attempts: Some(max_attempts),
      backoff_base,
    }
  }

  /// Whether `row` should be replayed in a drain running at `now`.
  pub fn is_due(&self, row: &QueueRow, now: DateTime<Utc>) -> bool {
    if row.status == QueueStatus::Abandoned {
      return false;
    }
    match (self.backoff_base, row.next_attempt_at) {
      (Some(_), Some(at)) => at <= now,
      _ => true,
    }
  }

  /// Status and next attempt time after a row's `failures`-th failed replay.
  pub fn after_failure(
    &self,
    failures: u32,
    now: DateTime<Utc>,
  ) -> (QueueStatus, Option<DateTime<Utc>>) {
    if self.max_attempts.is_some_and(|max| failures >= max) {
      return (QueueStatus::Abandoned, None);
    }

    let next = self.backoff_base.map(|base| {
      let exponent = failures.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
      let delay = base.saturating_mul(2u32.pow(exponent));
      let delay = Duration::from_std(delay)
        .unwrap_or_else(|_| max_backoff())
        .min(max_backoff());
      now.checked_add_signed(delay).unwrap_or(now)
    });
    (QueueStatus::Failed, next)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::SyncKey;

  fn row(status: QueueStatus, next_attempt_at: Option<DateTime<Utc>>) -> QueueRow {
    let now = Utc::now();
    QueueRow {
      id: 1,
      key: SyncKey::new("students", "s1", "create"),
      payload: "{}".to_string(),
      status,
      retry_count: 1,
      error_message: None,
      next_attempt_at,
      created_at: now,
      updated_at: now,
    }
  }

  #[test]
  fn test_default_never_gives_up() {
    let policy = RetryPolicy::default();
    let now = Utc::now();
    assert_eq!(policy.after_failure(1_000, now), (QueueStatus::Failed, None));
    assert!(policy.is_due(&row(QueueStatus::Failed, None), now));
  }

  #[test]
  fn test_bounded_abandons() {
    let policy = RetryPolicy::bounded(3, None);
    let now = Utc::now();
    assert_eq!(policy.after_failure(2, now).0, QueueStatus::Failed);
    assert_eq!(policy.after_failure(3, now).0, QueueStatus::Abandoned);
    assert!(!policy.is_due(&row(QueueStatus::Abandoned, None), now));
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let base = std::time::Duration::from_secs(5);
    let policy = RetryPolicy::bounded(100, Some(base));
    let now = Utc::now();

    let delay = |failures| policy.after_failure(failures, now).1.unwrap() - now;
    assert_eq!(delay(1), Duration::seconds(5));
    assert_eq!(delay(2), Duration::seconds(10));
    assert_eq!(delay(4), Duration::seconds(40));
    assert_eq!(delay(50), Duration::seconds(5 * 256));

    let waiting = row(QueueStatus::Failed, Some(now + Duration::seconds(5)));
    assert!(!policy.is_due(&waiting, now));
    assert!(policy.is_due(&waiting, now + Duration::seconds(5)));
  }

  #[test]
  fn test_huge_backoff_base_is_clamped() {
    let base = std::time::Duration::from_secs(10_000_000_000_000);
    let policy = RetryPolicy::bounded(100, Some(base));
    let now = Utc::now();

    let (status, next) = policy.after_failure(3, now);
    assert_eq!(status, QueueStatus::Failed);
    assert_eq!(next.unwrap() - now, max_backoff());
    assert!(crate::db::parse_timestamp(&crate::db::format_timestamp(next.unwrap())).is_ok());
  }
}
