//! Reachability probes used to confirm "network present" signals.

use async_trait::async_trait;
use futures::future::select_ok;
use std::time::Duration;

/// Answers "can we actually reach the internet right now?".
///
/// Implementations must never fail: any error means unreachable.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
  async fn is_reachable(&self) -> bool;
}

/// Resolves a set of well-known hosts; any one resolving counts as reachable.
///
/// Captive portals usually let the OS report a link while DNS for outside
/// hosts fails or hangs, which is what this catches.
#[derive(Debug, Clone)]
pub struct DnsProbe {
  hosts: Vec<String>,
  timeout: Duration,
}

impl DnsProbe {
  pub const DEFAULT_HOSTS: [&'static str; 2] = ["one.one.one.one:443", "dns.google:443"];
  pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

  /// Hosts without a port get `:443`.
  pub fn new<I, S>(hosts: I, timeout: Duration) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let hosts: Vec<String> = hosts
      .into_iter()
      .map(Into::into)
      .map(|host| {
        if host.contains(':') {
          host
        } else {
          format!("{}:443", host)
        }
      })
      .collect();

    if hosts.len() < 2 {
      tracing::warn!(
        count = hosts.len(),
        "fewer than two probe hosts configured; a single outage will look like being offline"
      );
    }

    Self { hosts, timeout }
  }

  pub fn hosts(&self) -> &[String] {
    &self.hosts
  }
}

impl Default for DnsProbe {
  fn default() -> Self {
    Self::new(Self::DEFAULT_HOSTS, Self::DEFAULT_TIMEOUT)
  }
}

async fn resolve(host: &str) -> Result<(), String> {
  let mut addrs = tokio::net::lookup_host(host)
    .await
    .map_err(|e| format!("{}: {}", host, e))?;
  if addrs.next().is_some() {
    Ok(())
  } else {
    Err(format!("{}: no addresses", host))
  }
}

#[async_trait]
impl ReachabilityProbe for DnsProbe {
  async fn is_reachable(&self) -> bool {
    if self.hosts.is_empty() {
      return false;
    }

    let lookups = self.hosts.iter().map(|host| Box::pin(resolve(host)));

    match tokio::time::timeout(self.timeout, select_ok(lookups)).await {
      Ok(Ok(_)) => true,
      Ok(Err(e)) => {
        tracing::debug!(error = %e, "reachability probe failed");
        false
      }
      Err(_) => {
        tracing::debug!(timeout_ms = self.timeout.as_millis() as u64, "reachability probe timed out");
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_port_is_added() {
    let probe = DnsProbe::new(["example.org", "dns.google:53"], Duration::from_secs(1));
    assert_eq!(probe.hosts(), &["example.org:443", "dns.google:53"]);
  }

  #[tokio::test]
  async fn test_no_hosts_is_unreachable() {
    let probe = DnsProbe::new(Vec::<String>::new(), Duration::from_secs(1));
    assert!(!probe.is_reachable().await);
  }

  #[tokio::test]
  async fn test_localhost_resolves() {
    let probe = DnsProbe::new(["localhost:80", "127.0.0.1:80"], Duration::from_secs(5));
    assert!(probe.is_reachable().await);
  }

  #[tokio::test]
  async fn test_unresolvable_hosts_are_unreachable() {
    let probe = DnsProbe::new(
      ["does-not-exist.invalid:443", "also-missing.invalid:443"],
      Duration::from_secs(5),
    );
    assert!(!probe.is_reachable().await);
  }
}
