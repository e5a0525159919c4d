use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::listeners::{ListenerSet, Subscription};

/// Point-in-time view of connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub is_online: bool,
}

/// Best-effort connectivity signal.
///
/// Platform glue feeds connectivity events into `set_online`; an optional
/// reachability probe can run alongside to catch changes the platform does
/// not report. Captive portals and similar false positives are accepted.
pub struct NetworkMonitor {
    online: Mutex<bool>,
    listeners: ListenerSet<NetworkSnapshot>,
}

impl NetworkMonitor {
    pub fn new(initial_online: bool) -> Self {
        Self { online: Mutex::new(initial_online), listeners: ListenerSet::new() }
    }

    pub fn is_online(&self) -> bool {
        *self.online.lock()
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot { is_online: self.is_online() }
    }

    /// Called with the current snapshot right away, then on every transition.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkSnapshot) + Send + Sync + 'static,
    {
        self.listeners.subscribe(|| self.snapshot(), listener)
    }

    /// Record a connectivity change. Listeners only hear about actual flips.
    pub fn set_online(&self, online: bool) {
        self.listeners.publish(|| {
            {
                let mut current = self.online.lock();
                if *current == online {
                    return None;
                }
                *current = online;
            }
            if online {
                info!("network online");
            } else {
                warn!("network offline");
            }
            Some(NetworkSnapshot { is_online: online })
        });
    }

    /// Poll `probe` every `interval` and feed the result into `set_online`.
    /// The task runs until the returned handle is aborted.
    pub fn spawn_reachability_checks(
        self: &Arc<Self>,
        probe: Arc<dyn ReachabilityProbe>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = probe.probe().await;
                let Some(monitor) = monitor.upgrade() else {
                    debug!("network monitor dropped; stopping reachability checks");
                    return;
                };
                monitor.set_online(reachable);
            }
        })
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Active check that the backend can actually be reached.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Sends a `HEAD` to a known URL; any HTTP response at all means reachable.
pub struct HttpReachabilityProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpReachabilityProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, url = %self.url, "reachability probe failed");
                false
            }
        }
    }
}
