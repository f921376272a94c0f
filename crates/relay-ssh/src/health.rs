//! Cheap reachability probe so the gateway doesn't attempt a full SSH
//! round-trip on every fallback dispatch when the operator's machine is
//! simply offline. Unlike a bare TCP dial, this authenticates and runs a
//! real command (spec §4.J: "a probe (`echo ok`)") — a port being open
//! proves nothing about whether the configured credentials or the remote
//! shell actually work.

use crate::client::{SshClient, SshConfig};
use crate::platform::Platform;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const CACHE_TTL: Duration = Duration::from_secs(15);
const PROBE_TIMEOUT_SECS: u64 = 5;

struct CachedProbe {
    reachable: bool,
    checked_at: Instant,
}

#[derive(Clone)]
pub struct HealthProbe {
    config: Arc<SshConfig>,
    platform: Platform,
    cached: Arc<Mutex<Option<CachedProbe>>>,
}

impl HealthProbe {
    pub fn new(config: SshConfig, platform: Platform) -> Self {
        Self {
            config: Arc::new(config),
            platform,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Connects, authenticates, and runs `echo ok` (`cmd /c echo ok` on
    /// Windows) through a fresh `SshClient`. Cached for [`CACHE_TTL`] so a
    /// burst of dispatches doesn't each pay a full SSH handshake.
    pub async fn is_reachable(&self) -> bool {
        let mut cached = self.cached.lock().await;
        if let Some(probe) = cached.as_ref() {
            if probe.checked_at.elapsed() < CACHE_TTL {
                return probe.reachable;
            }
        }

        let reachable = self.probe_once().await;
        *cached = Some(CachedProbe {
            reachable,
            checked_at: Instant::now(),
        });
        reachable
    }

    async fn probe_once(&self) -> bool {
        let command = match self.platform {
            Platform::Windows => "cmd /c echo ok",
            Platform::Unix => "echo ok",
        };
        let config = self.config.clone();
        let probe = async move {
            let mut client = SshClient::connect(&config).await?;
            client.exec(command, PROBE_TIMEOUT_SECS).await
        };
        match tokio::time::timeout(Duration::from_secs(PROBE_TIMEOUT_SECS + 2), probe).await {
            Ok(Ok((code, stdout, _))) => code == 0 && stdout.trim() == "ok",
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "ssh health probe failed");
                false
            }
            Err(_) => {
                tracing::debug!("ssh health probe timed out");
                false
            }
        }
    }
}
