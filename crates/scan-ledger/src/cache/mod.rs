use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

/// Liveness of an optional cache. The cache is advisory: an unreachable
/// cache degrades health, it never fails core operations.
#[async_trait::async_trait]
pub trait CacheProbe: Send + Sync {
    async fn ping(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Ok,
    Degraded,
    Disabled,
}

pub struct RedisProbe {
    client: redis::Client,
    timeout: Duration,
}

impl RedisProbe {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl CacheProbe for RedisProbe {
    async fn ping(&self) -> anyhow::Result<()> {
        let probe = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            anyhow::ensure!(pong == "PONG", "unexpected ping reply: {pong}");
            Ok::<(), anyhow::Error>(())
        };
        timeout(self.timeout, probe).await?
    }
}

/// Map an optional probe to a status without surfacing its error.
pub async fn check(probe: Option<&dyn CacheProbe>) -> CacheStatus {
    match probe {
        None => CacheStatus::Disabled,
        Some(probe) => match probe.ping().await {
            Ok(()) => CacheStatus::Ok,
            Err(e) => {
                tracing::warn!(error = %e, "cache unreachable, running degraded");
                CacheStatus::Degraded
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Down;

    #[async_trait::async_trait]
    impl CacheProbe for Down {
        async fn ping(&self) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    struct Up;

    #[async_trait::async_trait]
    impl CacheProbe for Up {
        async fn ping(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn status_reflects_probe_outcome() {
        assert_eq!(check(None).await, CacheStatus::Disabled);
        assert_eq!(check(Some(&Up)).await, CacheStatus::Ok);
        assert_eq!(check(Some(&Down)).await, CacheStatus::Degraded);
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(RedisProbe::new("not a url", Duration::from_millis(10)).is_err());
    }
}
